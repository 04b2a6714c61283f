use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::engine::{Engine, EngineError};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact the tenant's WAL once it has taken `threshold` appends since the
/// last compaction. Returns whether a compaction ran.
pub async fn maybe_compact(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!("compactor: {appends} append(s) since last compaction, threshold {threshold}");
        return Ok(false);
    }
    engine.compact_wal().await?;
    info!("compactor: WAL compacted after {appends} append(s)");
    Ok(true)
}

/// Background task: check the WAL periodically and compact when due.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = maybe_compact(&engine, threshold).await {
            error!("compactor: {e}");
        }
    }
}
