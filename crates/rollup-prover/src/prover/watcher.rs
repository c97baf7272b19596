use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::ChainEvent;
use crate::chain::L1Client;
use crate::config::EventLoopConfig;
use crate::state::ProverState;

/// Polls the inbox for new logs and forwards them as [`ChainEvent`]s.
///
/// A finalized event is emitted ahead of every proposal whose core state
/// shows a newer finalized proposal.
pub struct InboxWatcher {
    l1: Arc<dyn L1Client>,
    inbox: Address,
    state: Arc<ProverState>,
    events_tx: mpsc::Sender<ChainEvent>,
    wake: Arc<Notify>,
    next_block: u64,
    block_range: u64,
    poll_interval: Duration,
    last_finalized_seen: Option<u64>,
}

impl InboxWatcher {
    pub fn new(
        l1: Arc<dyn L1Client>,
        inbox: Address,
        state: Arc<ProverState>,
        events_tx: mpsc::Sender<ChainEvent>,
        wake: Arc<Notify>,
        config: &EventLoopConfig,
    ) -> Self {
        Self {
            l1,
            inbox,
            state,
            events_tx,
            wake,
            next_block: config.start_block,
            block_range: config.watcher_block_range.max(1),
            poll_interval: config.watcher_poll(),
            last_finalized_seen: None,
        }
    }

    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    pub async fn run(mut self, token: CancellationToken) -> Result<()> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("watching inbox {} from L1 block {}", self.inbox, self.next_block);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!("inbox watcher stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
            }
            if let Err(e) = self.poll_once().await {
                warn!("failed to poll inbox events: {e:#}");
            }
        }
    }

    /// Scans every block up to the current head.
    pub async fn poll_once(&mut self) -> Result<()> {
        if let Some(from) = self.state.take_rescan() {
            if from < self.next_block {
                info!("rescanning inbox from L1 block {from}");
                self.next_block = from;
            }
        }

        let head = self.l1.block_number().await?;
        while self.next_block <= head {
            let to = head.min(self.next_block.saturating_add(self.block_range - 1));
            let raw_events = self.l1.inbox_events(self.inbox, self.next_block, to).await?;
            debug!("fetched {} inbox events in blocks {}..={to}", raw_events.len(), self.next_block);

            for raw in &raw_events {
                let event = match ChainEvent::decode(raw) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("skipping undecodable {:?} event in block {}: {e}", raw.kind, raw.block_number);
                        continue;
                    }
                };
                if let ChainEvent::Proposed { payload, .. } = &event {
                    let core = &payload.core_state;
                    if self
                        .last_finalized_seen
                        .map_or(true, |seen| core.last_finalized_proposal_id > seen)
                    {
                        self.last_finalized_seen = Some(core.last_finalized_proposal_id);
                        self.emit(ChainEvent::Finalized {
                            proposal_id: core.last_finalized_proposal_id,
                            transition_hash: core.last_finalized_transition_hash,
                        })
                        .await?;
                    }
                }
                self.emit(event).await?;
            }
            self.next_block = to + 1;
        }
        Ok(())
    }

    async fn emit(&self, event: ChainEvent) -> Result<()> {
        self.events_tx
            .send(event)
            .await
            .map_err(|_| anyhow!("chain event channel closed"))
    }
}
