//! End-to-end scenarios: recorded and live sources through every strategy.

use anyhow::Result;
use bytes::Bytes;
use smd_builder::{
    BuilderError, Callbacks, Datagram, LiveSource, ParallelMode, Pipeline, PipelineConfig,
    ReplaySource, Source, TransitionId, encode_stream,
};
use std::io::Write;
use std::sync::{Arc, Mutex};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// One detector's recording: Configure, then `runs` runs of `events` events.
fn recording(source: usize, runs: u32, events: u64) -> Vec<Datagram> {
    let mut dgrams = vec![Datagram::transition(source, 0, TransitionId::Configure)];
    let mut ts = 100;
    for run in 1..=runs {
        dgrams.push(Datagram::new(source, ts, TransitionId::BeginRun, run.to_le_bytes().to_vec()));
        dgrams.push(Datagram::transition(source, ts + 1, TransitionId::BeginStep));
        for i in 0..events {
            let payload = format!("s{source}-r{run}-e{i}").into_bytes();
            dgrams.push(Datagram::event(source, ts + 10 + i * 10, payload));
        }
        ts += 10 + events * 10;
        dgrams.push(Datagram::transition(source, ts, TransitionId::EndStep));
        dgrams.push(Datagram::transition(source, ts + 1, TransitionId::EndRun));
        ts += 100;
    }
    dgrams
}

fn replay_sources(views: &[Bytes]) -> Vec<Box<dyn Source>> {
    views
        .iter()
        .enumerate()
        .map(|(i, v)| Box::new(ReplaySource::from_bytes(i, v.clone())) as Box<dyn Source>)
        .collect()
}

type Log = Arc<Mutex<Vec<(Option<u32>, u64, usize)>>>;

fn event_log() -> (Callbacks, Log, Arc<Mutex<Vec<Option<u32>>>>) {
    let events: Log = Arc::default();
    let runs = Arc::new(Mutex::new(Vec::new()));
    let (events_cb, runs_cb) = (Arc::clone(&events), Arc::clone(&runs));
    let callbacks = Callbacks::new()
        .on_run(move |run| runs_cb.lock().unwrap().push(run.run_number()))
        .on_event(move |evt, run| {
            let entry = (run.and_then(|r| r.run_number()), evt.timestamp, evt.dgrams.len());
            events_cb.lock().unwrap().push(entry);
        });
    (callbacks, events, runs)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_strategy_sees_every_event_in_its_run() -> Result<()> {
    init_tracing();
    let views: Vec<Bytes> = (0..3).map(|s| encode_stream(&recording(s, 3, 20))).collect();

    let mut baseline = None;
    for mode in [ParallelMode::Serial, ParallelMode::FixedRank, ParallelMode::DynamicTask] {
        let config =
            PipelineConfig { mode, workers: 3, chunk_events: 7, batch_size: 3, ..Default::default() };
        let (callbacks, events, runs) = event_log();
        let mut pipeline = Pipeline::open(config, replay_sources(&views)).await?;
        let summary = pipeline.analyze(callbacks).await?;

        assert!(summary.is_clean(), "{mode}: {summary:?}");
        assert_eq!(summary.events, 60);
        // four transitions per run, none forwarded to the event callback
        assert_eq!(summary.transitions, 12);

        let mut events = events.lock().unwrap().clone();
        assert!(events.iter().all(|(run, _, dgrams)| run.is_some() && *dgrams == 3));
        events.sort();
        let runs = runs.lock().unwrap().clone();
        for number in 1..=3 {
            assert!(runs.contains(&Some(number)), "{mode}: run {number} never announced");
        }

        match &baseline {
            None => baseline = Some(events),
            Some(expected) => assert_eq!(&events, expected, "{mode}"),
        }
    }
    Ok(())
}

#[tokio::test]
async fn recorded_files_replay_from_disk() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let mut sources: Vec<Box<dyn Source>> = Vec::new();
    for s in 0..2 {
        let path = dir.path().join(format!("run-s{s:02}.smd"));
        std::fs::File::create(&path)?.write_all(&encode_stream(&recording(s, 1, 5)))?;
        sources.push(Box::new(ReplaySource::open(s, &path)?));
    }

    let (callbacks, events, runs) = event_log();
    let mut pipeline = Pipeline::open(PipelineConfig::default(), sources).await?;
    let summary = pipeline.analyze(callbacks).await?;

    assert_eq!(summary.events, 5);
    assert_eq!(*runs.lock().unwrap(), vec![Some(1)]);
    let timestamps: Vec<_> = events.lock().unwrap().iter().map(|(_, ts, _)| *ts).collect();
    assert_eq!(timestamps, vec![110, 120, 130, 140, 150]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn live_sources_feed_a_dynamic_pipeline() -> Result<()> {
    init_tracing();
    let mut senders = Vec::new();
    let mut sources: Vec<Box<dyn Source>> = Vec::new();
    for s in 0..2 {
        let (tx, source) = LiveSource::channel(s, 16);
        senders.push(tx);
        sources.push(Box::new(source));
    }

    let producers: Vec<_> = senders
        .into_iter()
        .enumerate()
        .map(|(s, tx)| {
            tokio::spawn(async move {
                for dgram in recording(s, 2, 10) {
                    if tx.send(dgram).await.is_err() {
                        break;
                    }
                }
            })
        })
        .collect();

    let config = PipelineConfig {
        mode: ParallelMode::DynamicTask,
        chunk_events: 4,
        ..Default::default()
    };
    let (callbacks, events, runs) = event_log();
    let mut pipeline = Pipeline::open(config, sources).await?;
    let summary = pipeline.analyze(callbacks).await?;
    for producer in producers {
        producer.await?;
    }

    assert!(summary.is_clean());
    assert_eq!(summary.events, 20);
    assert_eq!(events.lock().unwrap().len(), 20);
    assert_eq!(*runs.lock().unwrap(), vec![Some(1), Some(2)]);
    Ok(())
}

#[tokio::test]
async fn corrupt_tail_on_one_source_spares_the_others() -> Result<()> {
    init_tracing();
    let mut views: Vec<Bytes> = (0..3).map(|s| encode_stream(&recording(s, 1, 4))).collect();
    let cut = views[1].len() - 5;
    views[1] = views[1].slice(..cut);

    let (callbacks, events, _) = event_log();
    let mut pipeline = Pipeline::open(PipelineConfig::default(), replay_sources(&views)).await?;
    let summary = pipeline.analyze(callbacks).await?;

    assert_eq!(summary.source_failures.len(), 1);
    assert_eq!(summary.source_failures[0].source, 1);
    assert_eq!(summary.events, 4);
    assert!(events.lock().unwrap().iter().all(|(_, _, dgrams)| *dgrams >= 2));
    Ok(())
}

#[tokio::test]
async fn sources_must_open_with_configure() {
    let views = vec![
        encode_stream(&recording(0, 1, 1)),
        encode_stream(&[Datagram::event(1, 5, vec![0u8])]),
    ];
    let err = Pipeline::open(PipelineConfig::default(), replay_sources(&views)).await.err();
    assert!(matches!(err, Some(BuilderError::MissingConfigure { source_index: 1 })));
}

#[test]
fn config_loads_from_yaml_file() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "mode: fixed_rank")?;
    writeln!(file, "workers: 6")?;
    writeln!(file, "max_events: 1000")?;

    let config = PipelineConfig::from_file(file.path())?;
    assert_eq!(config.mode, ParallelMode::FixedRank);
    assert_eq!(config.workers, 6);
    assert_eq!(config.max_events, Some(1000));
    assert_eq!(config.chunk_events, PipelineConfig::default().chunk_events);
    Ok(())
}
