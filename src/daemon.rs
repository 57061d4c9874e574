//! Unattended polling mode

use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::models::ProcessingStats;
use crate::pipeline::LeadPipeline;

/// Totals over the lifetime of a daemon
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DaemonSummary {
    pub iterations: u64,
    pub failed_iterations: u64,
    pub totals: ProcessingStats,
}

impl fmt::Display for DaemonSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Iterations: {} (failed: {}), {}",
            self.iterations, self.failed_iterations, self.totals
        )
    }
}

/// Run the pipeline every `interval` until `shutdown` is cancelled.
///
/// A failed iteration is logged and the loop carries on. Cancellation
/// interrupts the sleep between iterations; a running iteration finishes first.
pub async fn run_daemon(
    pipeline: &LeadPipeline,
    interval: Duration,
    shutdown: CancellationToken,
) -> DaemonSummary {
    info!("Daemon started, processing every {}s", interval.as_secs());
    let mut summary = DaemonSummary::default();

    while !shutdown.is_cancelled() {
        summary.iterations += 1;
        match pipeline.process_emails(false, None).await {
            Ok(stats) => {
                info!("Iteration {} complete. {}", summary.iterations, stats);
                summary.totals.merge(&stats);
            }
            Err(e) => {
                summary.failed_iterations += 1;
                error!("Iteration {} failed: {}", summary.iterations, e);
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown requested, stopping daemon");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("Daemon stopped. {}", summary);
    summary
}
