//! Fixed worker ranks fed by a coordinator over channels
//!
//! Workers announce readiness by sending their rank; the coordinator answers
//! on that rank's inbox with the next chunk or `Stop`. Ranks share nothing but
//! the channels and the callbacks: each owns its run registry, so a run is
//! rebuilt (and its callback fired) once per rank that delivers its events.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::delivery::{ChunkLoop, Delivery};
use super::{ChunkFailure, StrategyContext, StrategyOutcome, spawn_reader};
use crate::identity::RunRegistry;
use crate::smd_reader::SmdChunk;
use crate::Result;

#[derive(Debug)]
enum WorkerMessage {
    Chunk(SmdChunk),
    Stop,
}

#[derive(Debug)]
struct WorkerReport {
    rank: usize,
    chunks: u64,
    failure: Option<ChunkFailure>,
}

pub(crate) async fn run(ctx: StrategyContext) -> Result<StrategyOutcome> {
    let StrategyContext { reader, callbacks, mut control, counters, cancel, config, .. } = ctx;
    let workers = config.workers;

    let (ready_tx, mut ready_rx) = mpsc::channel::<usize>(workers);
    let mut inboxes = Vec::with_capacity(workers);
    let mut ranks = JoinSet::new();
    for rank in 0..workers {
        let (inbox_tx, inbox_rx) = mpsc::channel(1);
        inboxes.push(inbox_tx);

        let registry = Arc::new(RunRegistry::new("run"));
        let delivery = Delivery::new(registry, callbacks.clone(), Arc::clone(&counters));
        let chunk_loop = ChunkLoop::new(delivery, control.fork());
        ranks.spawn(run_worker(rank, ready_tx.clone(), inbox_rx, chunk_loop));
    }
    drop(ready_tx);
    info!(workers, "Fixed-rank workers started");

    let (mut chunk_rx, reader_task) = spawn_reader(reader, config.queue_depth, cancel.clone());
    let mut chunks = 0;
    let mut exhausted = false;

    while let Some(rank) = ready_rx.recv().await {
        let message = if exhausted {
            WorkerMessage::Stop
        } else {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                chunk = chunk_rx.recv() => chunk,
            };
            match next {
                Some(chunk) => {
                    chunks += 1;
                    debug!(rank, seq = chunk.seq, "Dispatching chunk");
                    WorkerMessage::Chunk(chunk)
                }
                None => {
                    exhausted = true;
                    WorkerMessage::Stop
                }
            }
        };
        if inboxes[rank].send(message).await.is_err() {
            warn!(rank, "Rank inbox closed");
        }
    }

    let mut failures = Vec::new();
    while let Some(joined) = ranks.join_next().await {
        let report = joined?;
        debug!(rank = report.rank, chunks = report.chunks, "Rank finished");
        failures.extend(report.failure);
    }
    failures.sort_by_key(|f: &ChunkFailure| f.seq);

    drop(chunk_rx);
    let reader = reader_task.await?;
    Ok(StrategyOutcome { reader, chunks, failures })
}

async fn run_worker(
    rank: usize,
    ready_tx: mpsc::Sender<usize>,
    mut inbox: mpsc::Receiver<WorkerMessage>,
    mut chunk_loop: ChunkLoop,
) -> WorkerReport {
    let mut report = WorkerReport { rank, chunks: 0, failure: None };

    loop {
        if ready_tx.send(rank).await.is_err() {
            break;
        }
        let Some(WorkerMessage::Chunk(chunk)) = inbox.recv().await else { break };

        let seq = chunk.seq;
        match chunk_loop.run_blocking(chunk).await {
            Ok((returned, Ok(()))) => {
                chunk_loop = returned;
                report.chunks += 1;
            }
            Ok((_, Err(e))) | Err(e) => {
                error!(rank, seq, "Rank aborted: {e}");
                report.failure = Some(ChunkFailure { seq, rank: Some(rank), error: e.to_string() });
                break;
            }
        }
    }

    report
}
