use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::scanner::ScanRunner;

/// Fixed-cadence trigger for reminder scans. Overlapping ticks are skipped rather than queued;
/// correctness never depends on it since the ledger tolerates concurrent runs.
#[derive(Debug, Clone, Copy)]
pub struct ScanScheduler {
    period: Duration,
}

impl ScanScheduler {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start the loop on the current runtime. The first scan runs immediately.
    pub fn spawn(self, runner: Arc<dyn ScanRunner>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(period_secs = self.period.as_secs(), "reminder scan scheduler started");

            loop {
                ticker.tick().await;
                match runner.run_scan(Utc::now()).await {
                    Ok(report) => info!(
                        triggered = report.summary.notifications_triggered,
                        sent = report.summary.total_notifications_sent,
                        "scheduled reminder scan complete"
                    ),
                    Err(err) => error!(error = %err, "scheduled reminder scan failed"),
                }
            }
        })
    }
}
