//! services/worker/src/scheduler.rs
//!
//! Drives `run_cycle` on a fixed interval until cancelled.

use std::time::Duration;

use auto_apply_core::AutoApplyService;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Scheduler {
    service: AutoApplyService,
    interval: Duration,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(service: AutoApplyService, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            service,
            interval,
            shutdown,
        }
    }

    /// Runs until the token is cancelled and returns how many cycles ran.
    /// The first cycle starts immediately. A cycle that is already running
    /// when cancellation arrives is allowed to finish.
    pub async fn run(&self) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        // A cycle that overruns its slot must not trigger a burst of catch-up cycles.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles = 0u64;

        info!(interval_secs = self.interval.as_secs(), "Scheduler started.");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(cycles, "Scheduler stopping.");
                    break;
                }
                _ = ticker.tick() => {
                    let summary = self.service.run_cycle().await;
                    cycles += 1;
                    if summary.failed > 0 {
                        warn!(
                            cycle_id = %summary.cycle_id,
                            failed = summary.failed,
                            "Cycle finished with failed users."
                        );
                    }
                }
            }
        }
        cycles
    }
}
