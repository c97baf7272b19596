use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ProofLane;
use crate::producer::ProofType;

/// Signals that `lane` is ready to aggregate when it is full or overdue.
///
/// The lane is marked as aggregating before the signal is sent, so no second
/// signal goes out until the batch is cleared. If the channel is full the mark
/// is undone and a later call tries again.
pub fn try_aggregate(lane: &ProofLane, forced_interval: Duration, aggregate_tx: &mpsc::Sender<ProofType>) -> bool {
    if !lane.try_begin_aggregation(forced_interval, Instant::now()) {
        return false;
    }
    match aggregate_tx.try_send(lane.proof_type()) {
        Ok(()) => {
            debug!("{} buffer ready for aggregation", lane.proof_type());
            true
        }
        Err(e) => {
            warn!("failed to signal {} aggregation: {e}", lane.proof_type());
            lane.reset_aggregating();
            false
        }
    }
}

/// Periodically flushes a lane's cache and checks its aggregation triggers.
pub struct BufferMonitor {
    lane: Arc<ProofLane>,
    forced_interval: Duration,
    tick: Duration,
    aggregate_tx: mpsc::Sender<ProofType>,
}

impl BufferMonitor {
    pub fn new(
        lane: Arc<ProofLane>,
        forced_interval: Duration,
        tick: Duration,
        aggregate_tx: mpsc::Sender<ProofType>,
    ) -> Self {
        Self {
            lane,
            forced_interval,
            tick,
            aggregate_tx,
        }
    }

    /// Spawns the monitor unless the time trigger is disabled.
    pub fn spawn(self, token: CancellationToken) -> Option<tokio::task::JoinHandle<()>> {
        if self.forced_interval.is_zero() {
            debug!("{} buffer monitor disabled", self.lane.proof_type());
            return None;
        }
        Some(tokio::spawn(self.run(token)))
    }

    pub async fn run(self, token: CancellationToken) {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("{} buffer monitor stopped", self.lane.proof_type());
                    return;
                }
                _ = ticker.tick() => {
                    self.lane.flush_cache();
                    try_aggregate(&self.lane, self.forced_interval, &self.aggregate_tx);
                }
            }
        }
    }
}
