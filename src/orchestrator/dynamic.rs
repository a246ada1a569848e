//! Task-per-chunk strategy
//!
//! The root spawns an event-builder task per chunk. Each event-builder task
//! generates batches synchronously and spawns one big-data task per batch;
//! every big-data task awaits its predecessor, so a chunk's events are
//! delivered in order while batch generation runs ahead.
//!
//! A chunk that begins a run is a barrier: everything dispatched before it
//! finishes first, and nothing after it starts until it completes.

use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use super::delivery::{ControlPoll, Counters, Delivery};
use super::{Callbacks, ChunkFailure, StrategyContext, StrategyOutcome, spawn_reader};
use crate::eventbuilder::EventBuilderManager;
use crate::handles::RunRef;
use crate::identity::RunRegistry;
use crate::smd_reader::SmdChunk;
use crate::types::Batch;
use crate::Result;

struct EbTask {
    registry: Arc<RunRegistry>,
    callbacks: Callbacks,
    counters: Arc<Counters>,
    control: ControlPoll,
}

struct EbReport {
    seq: u64,
    result: Result<()>,
}

pub(crate) async fn run(ctx: StrategyContext) -> Result<StrategyOutcome> {
    let StrategyContext { reader, session, callbacks, mut control, counters, cancel, config } = ctx;
    let (mut chunk_rx, reader_task) = spawn_reader(reader, config.queue_depth, cancel.clone());
    let mut tasks: JoinSet<EbReport> = JoinSet::new();
    let mut failures = Vec::new();
    let mut chunks = 0;
    info!(max_in_flight = config.queue_depth, "Dynamic task dispatch started");

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Dynamic analysis cancelled");
                break;
            }
            chunk = chunk_rx.recv() => chunk,
        };
        let Some(chunk) = next else { break };
        chunks += 1;

        let task = EbTask {
            registry: Arc::clone(&session.runs),
            callbacks: callbacks.clone(),
            counters: Arc::clone(&counters),
            control: control.fork(),
        };

        if chunk.begins_run() {
            drain(&mut tasks, &mut failures).await?;
            debug!(seq = chunk.seq, "Run barrier");
            record(run_eb_task(chunk, task).await, &mut failures);
        } else {
            while tasks.len() >= config.queue_depth {
                match tasks.join_next().await {
                    Some(joined) => record(joined?, &mut failures),
                    None => break,
                }
            }
            tasks.spawn(run_eb_task(chunk, task));
        }
    }

    drain(&mut tasks, &mut failures).await?;
    failures.sort_by_key(|f: &ChunkFailure| f.seq);

    drop(chunk_rx);
    let reader = reader_task.await?;
    Ok(StrategyOutcome { reader, chunks, failures })
}

async fn drain(tasks: &mut JoinSet<EbReport>, failures: &mut Vec<ChunkFailure>) -> Result<()> {
    while let Some(joined) = tasks.join_next().await {
        record(joined?, failures);
    }
    Ok(())
}

fn record(report: EbReport, failures: &mut Vec<ChunkFailure>) {
    if let Err(e) = report.result {
        error!(seq = report.seq, "Chunk failed: {e}");
        failures.push(ChunkFailure { seq: report.seq, rank: None, error: e.to_string() });
    }
}

async fn run_eb_task(chunk: SmdChunk, task: EbTask) -> EbReport {
    let seq = chunk.seq;
    let result = build_and_deliver(&chunk, task).await;
    EbReport { seq, result }
}

async fn build_and_deliver(chunk: &SmdChunk, task: EbTask) -> Result<()> {
    let EbTask { registry, callbacks, counters, mut control } = task;
    let smd_callback = Arc::clone(&callbacks.smd);
    let mut manager =
        EventBuilderManager::new(&chunk.smd, chunk.n_sources, control.pull_size(), smd_callback)?;

    let mut delivery = Delivery::new(registry, callbacks, counters);
    let start = if chunk.begins_run() { None } else { chunk.run };
    let begins: Arc<[RunRef]> = chunk.begins.clone().into();
    let mut chain: JoinHandle<Result<Delivery>> = tokio::task::spawn_blocking(move || {
        delivery.adopt(start.as_ref());
        Ok(delivery)
    });

    let mut generated = Ok(());
    {
        let mut batches = manager.batches();
        loop {
            if let Some(pull_size) = control.poll() {
                batches.set_pull_size(pull_size);
            }
            match batches.next() {
                Some(Ok((data, step))) => {
                    chain = tokio::spawn(run_bigdata_task(chain, data, step, Arc::clone(&begins)));
                }
                Some(Err(e)) => {
                    generated = Err(e);
                    break;
                }
                None => break,
            }
        }
    }

    chain.await??;
    debug!(seq = chunk.seq, "Chunk delivered");
    generated
}

async fn run_bigdata_task(
    prev: JoinHandle<Result<Delivery>>,
    data: Batch,
    step: Batch,
    begins: Arc<[RunRef]>,
) -> Result<Delivery> {
    let mut delivery = prev.await??;
    tokio::task::spawn_blocking(move || delivery.deliver(&data, &step, &begins).map(|()| delivery))
        .await?
}
