//! Background sweep that releases expired leases.
//!
//! The sweep is just another caller of the engine: it talks to the store
//! through ordinary versioned writes and needs no coordination with request
//! handlers or with sweeps running on other gateway instances.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::LeaseEngine;

pub struct ReclaimTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ReclaimTask {
    /// Stops the sweep and waits for an in-progress run to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("Reclaim task ended abnormally: {e}");
        }
    }
}

pub fn spawn_reclaim_task(engine: Arc<LeaseEngine>, every: Duration) -> ReclaimTask {
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(run_reclaim_loop(engine, every, cancel.clone()));
    ReclaimTask { cancel, handle }
}

async fn run_reclaim_loop(engine: Arc<LeaseEngine>, every: Duration, cancel: CancellationToken) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(interval_secs = every.as_secs(), "Lease reclaim task started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Lease reclaim task shutting down");
                break;
            }
            _ = ticker.tick() => {
                match engine.reclaim().await {
                    Ok(report) if report.reclaimed > 0 || report.failed > 0 => {
                        info!(
                            examined = report.examined,
                            reclaimed = report.reclaimed,
                            skipped = report.skipped,
                            failed = report.failed,
                            "Lease reclaim sweep finished"
                        );
                    }
                    Ok(report) => {
                        debug!(examined = report.examined, "Lease reclaim sweep found nothing to release");
                    }
                    Err(e) => warn!("Lease reclaim sweep failed: {e}"),
                }
            }
        }
    }
}
