//! Single-task strategy

use tracing::{error, info};

use super::delivery::{ChunkLoop, Delivery};
use super::{ChunkFailure, StrategyContext, StrategyOutcome};
use crate::Result;

/// Process chunks one after another on the calling task.
pub(crate) async fn run(ctx: StrategyContext) -> Result<StrategyOutcome> {
    let StrategyContext { mut reader, session, callbacks, control, counters, cancel, .. } = ctx;
    let delivery = Delivery::new(session.runs.clone(), callbacks, counters);
    let mut chunk_loop = ChunkLoop::new(delivery, control);
    let mut chunks = 0;
    let mut failures = Vec::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Serial analysis cancelled");
                break;
            }
            chunk = reader.next_chunk() => chunk,
        };
        let Some(chunk) = chunk else { break };
        chunks += 1;

        let seq = chunk.seq;
        let (returned, result) = chunk_loop.run_blocking(chunk).await?;
        chunk_loop = returned;
        if let Err(e) = result {
            error!(seq, "Chunk failed: {e}");
            failures.push(ChunkFailure { seq, rank: None, error: e.to_string() });
        }
    }

    Ok(StrategyOutcome { reader, chunks, failures })
}
