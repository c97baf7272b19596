use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, B256};
use anyhow::{anyhow, Result};
use inbox_codec::{ProposedEventPayload, ProvedEventPayload};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::ChainEvent;
use crate::buffer::ProofLanes;
use crate::chain::L1Client;
use crate::producer::{ProofRequest, ProposalMeta};
use crate::state::{L1Cursor, OnchainRecord, ProverState};
use crate::submitter::REORG_RESCAN_DEPTH;

#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub prover_address: Address,
    pub proving_window: Duration,
    pub prove_unassigned: bool,
    pub start_proposal_id: u64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Turns chain events into proof requests and keeps [`ProverState`] current.
pub struct EventHandler {
    state: Arc<ProverState>,
    lanes: Arc<ProofLanes>,
    l1: Arc<dyn L1Client>,
    request_tx: mpsc::Sender<ProofRequest>,
    events_tx: mpsc::Sender<ChainEvent>,
    settings: HandlerSettings,
}

impl EventHandler {
    pub fn new(
        state: Arc<ProverState>,
        lanes: Arc<ProofLanes>,
        l1: Arc<dyn L1Client>,
        request_tx: mpsc::Sender<ProofRequest>,
        events_tx: mpsc::Sender<ChainEvent>,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            state,
            lanes,
            l1,
            request_tx,
            events_tx,
            settings,
        }
    }

    pub async fn handle_proposed(
        &self,
        payload: &ProposedEventPayload,
        l1_block_number: u64,
        l1_block_hash: B256,
        token: &CancellationToken,
    ) -> Result<()> {
        let id = payload.proposal.id;
        if id == 0 || id < self.settings.start_proposal_id {
            return Ok(());
        }
        if id <= self.state.last_handled_id() {
            debug!("proposal {id} already handled");
            return Ok(());
        }

        let canonical = self.l1.block_hash(l1_block_number).await?;
        if canonical != Some(l1_block_hash) {
            warn!(
                "proposal {id} was emitted in non-canonical L1 block {l1_block_number} ({l1_block_hash}), rescanning"
            );
            self.state
                .request_rescan(l1_block_number.saturating_sub(REORG_RESCAN_DEPTH));
            return Ok(());
        }

        self.state.set_l1_current(L1Cursor {
            number: l1_block_number,
            hash: l1_block_hash,
        });
        let meta = ProposalMeta {
            proposal: payload.proposal.clone(),
            l1_block_number,
            l1_block_hash,
        };
        self.state.remember_proposal(meta.clone());
        self.state.set_last_handled(id);

        if self.state.is_finalized(id) {
            debug!("proposal {id} already finalized");
            return Ok(());
        }
        self.consider(meta, token).await
    }

    /// Decides whether this prover should prove `meta` now, later or never.
    async fn consider(&self, meta: ProposalMeta, token: &CancellationToken) -> Result<()> {
        let id = meta.id();
        match self.state.record_is_valid(id) {
            Some(true) => {
                debug!("proposal {id} already has a valid proof on chain");
                self.lanes.mark_resolved_except(id, None);
                return Ok(());
            }
            Some(false) => {
                info!("proposal {id} has an invalid proof on chain, proving it");
                return self.request(meta).await;
            }
            None => {}
        }

        if meta.proposal.proposer != self.settings.prover_address {
            if !self.settings.prove_unassigned {
                debug!("proposal {id} is assigned to {}, skipping", meta.proposal.proposer);
                self.lanes.mark_resolved_except(id, None);
                return Ok(());
            }
            let window_end = meta
                .proposal
                .timestamp
                .saturating_add(self.settings.proving_window.as_secs());
            let now = unix_now();
            if now < window_end {
                let wait = Duration::from_secs(window_end - now);
                debug!("proposal {id} is assigned to {}, revisiting in {wait:?}", meta.proposal.proposer);
                self.schedule_expiry(id, wait, token.clone());
                return Ok(());
            }
        }
        self.request(meta).await
    }

    fn schedule_expiry(&self, proposal_id: u64, wait: Duration, token: CancellationToken) {
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = sleep(wait) => {
                    if events_tx.send(ChainEvent::AssignmentExpired { proposal_id }).await.is_err() {
                        debug!("event loop gone before proposal {proposal_id} expired");
                    }
                }
            }
        });
    }

    async fn request(&self, meta: ProposalMeta) -> Result<()> {
        let id = meta.id();
        self.request_tx
            .send(ProofRequest::new(meta))
            .await
            .map_err(|_| anyhow!("proof request channel closed"))?;
        debug!("requested proof for proposal {id}");
        Ok(())
    }

    pub fn handle_proved(&self, payload: &ProvedEventPayload) {
        let id = payload.proposal_id;
        debug!(
            "proposal {id} proven by {} with transition {}",
            payload.metadata.actual_prover, payload.transition_record.transition_hash
        );
        self.state.set_record(id, OnchainRecord::from(payload));
    }

    pub fn handle_finalized(&self, proposal_id: u64, transition_hash: B256) {
        if !self.state.set_last_finalized(proposal_id, transition_hash) {
            return;
        }
        info!("proposal {proposal_id} finalized");
        self.lanes.advance_all(proposal_id + 1);
        let pruned = self.state.prune(proposal_id);
        if pruned > 0 {
            debug!("pruned {pruned} settled entries up to proposal {proposal_id}");
        }
    }

    pub async fn handle_assignment_expired(&self, proposal_id: u64, token: &CancellationToken) -> Result<()> {
        if self.state.is_finalized(proposal_id) {
            return Ok(());
        }
        let Some(meta) = self.state.proposal(proposal_id) else {
            debug!("proposal {proposal_id} is no longer tracked");
            return Ok(());
        };
        info!("proving window of proposal {proposal_id} expired");
        self.consider(meta, token).await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use inbox_codec::{Proposal, TransitionMetadata, TransitionRecord};

    use super::*;
    use crate::chain::RawInboxEvent;
    use crate::producer::ProofType;

    fn me() -> Address {
        Address::repeat_byte(0xee)
    }

    struct FixedL1;

    #[async_trait]
    impl L1Client for FixedL1 {
        async fn block_hash(&self, number: u64) -> Result<Option<B256>> {
            Ok(Some(B256::with_last_byte(number as u8)))
        }

        async fn block_number(&self) -> Result<u64> {
            Ok(0)
        }

        async fn inbox_events(&self, _inbox: Address, _from: u64, _to: u64) -> Result<Vec<RawInboxEvent>> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        handler: EventHandler,
        state: Arc<ProverState>,
        lanes: Arc<ProofLanes>,
        requests: mpsc::Receiver<ProofRequest>,
        events: mpsc::Receiver<ChainEvent>,
    }

    fn harness(prove_unassigned: bool) -> Harness {
        let state = Arc::new(ProverState::new());
        let lanes = Arc::new(ProofLanes::new(&[ProofType::Sgx], 8, 1));
        let (request_tx, requests) = mpsc::channel(8);
        let (events_tx, events) = mpsc::channel(8);
        let handler = EventHandler::new(
            state.clone(),
            lanes.clone(),
            Arc::new(FixedL1),
            request_tx,
            events_tx,
            HandlerSettings {
                prover_address: me(),
                proving_window: Duration::from_secs(3600),
                prove_unassigned,
                start_proposal_id: 1,
            },
        );
        Harness {
            handler,
            state,
            lanes,
            requests,
            events,
        }
    }

    fn payload(id: u64, proposer: Address, timestamp: u64) -> ProposedEventPayload {
        ProposedEventPayload {
            proposal: Proposal {
                id,
                proposer,
                timestamp,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_own_proposal_is_requested_once() {
        let mut h = harness(false);
        let token = CancellationToken::new();
        let p = payload(1, me(), unix_now());

        h.handler.handle_proposed(&p, 5, B256::with_last_byte(5), &token).await.unwrap();
        assert_eq!(h.requests.try_recv().unwrap().id(), 1);
        assert_eq!(h.state.l1_current().number, 5);

        h.handler.handle_proposed(&p, 5, B256::with_last_byte(5), &token).await.unwrap();
        assert!(h.requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reorged_proposal_requests_rescan() {
        let mut h = harness(false);
        let token = CancellationToken::new();

        h.handler
            .handle_proposed(&payload(1, me(), 0), 100, B256::repeat_byte(0xab), &token)
            .await
            .unwrap();
        assert!(h.requests.try_recv().is_err());
        assert_eq!(h.state.last_handled_id(), 0);
        assert_eq!(h.state.take_rescan(), Some(100 - REORG_RESCAN_DEPTH));
    }

    #[tokio::test]
    async fn test_foreign_proposal_skipped_and_resolved() {
        let mut h = harness(false);
        let token = CancellationToken::new();

        h.handler
            .handle_proposed(&payload(1, Address::repeat_byte(1), 0), 5, B256::with_last_byte(5), &token)
            .await
            .unwrap();
        assert!(h.requests.try_recv().is_err());
        assert_eq!(h.lanes.get(ProofType::Sgx).unwrap().frontier(), 2);
    }

    #[tokio::test]
    async fn test_unassigned_proposal_waits_for_window() {
        let mut h = harness(true);
        let token = CancellationToken::new();

        // expired window, proven right away
        h.handler
            .handle_proposed(&payload(1, Address::repeat_byte(1), 0), 5, B256::with_last_byte(5), &token)
            .await
            .unwrap();
        assert_eq!(h.requests.try_recv().unwrap().id(), 1);

        // open window, revisited on expiry
        h.handler
            .handle_proposed(
                &payload(2, Address::repeat_byte(1), unix_now()),
                6,
                B256::with_last_byte(6),
                &token,
            )
            .await
            .unwrap();
        assert!(h.requests.try_recv().is_err());
        assert!(h.state.proposal(2).is_some());

        h.handler.handle_assignment_expired(2, &token).await.unwrap();
        assert!(h.requests.try_recv().is_err());
        assert!(h.events.try_recv().is_err());
        token.cancel();
    }

    #[tokio::test]
    async fn test_valid_onchain_record_is_not_reproven() {
        let mut h = harness(false);
        let token = CancellationToken::new();
        h.handler.handle_finalized(1, B256::repeat_byte(1));
        h.handler.handle_proved(&ProvedEventPayload {
            proposal_id: 2,
            transition: inbox_codec::Transition {
                parent_transition_hash: B256::repeat_byte(1),
                ..Default::default()
            },
            transition_record: TransitionRecord::default(),
            metadata: TransitionMetadata::default(),
        });

        h.handler
            .handle_proposed(&payload(2, me(), unix_now()), 5, B256::with_last_byte(5), &token)
            .await
            .unwrap();
        assert!(h.requests.try_recv().is_err());

        // a record built on the wrong parent is proven again
        h.handler.handle_proved(&ProvedEventPayload {
            proposal_id: 3,
            transition: inbox_codec::Transition {
                parent_transition_hash: B256::repeat_byte(7),
                ..Default::default()
            },
            ..Default::default()
        });
        h.handler
            .handle_proposed(&payload(3, Address::repeat_byte(1), unix_now()), 6, B256::with_last_byte(6), &token)
            .await
            .unwrap();
        assert_eq!(h.requests.try_recv().unwrap().id(), 3);
    }

    #[tokio::test]
    async fn test_finalization_advances_lanes_and_prunes() {
        let h = harness(false);
        h.state.remember_proposal(ProposalMeta {
            proposal: Proposal {
                id: 3,
                ..Default::default()
            },
            ..Default::default()
        });
        h.handler.handle_finalized(4, B256::repeat_byte(4));
        assert_eq!(h.lanes.get(ProofType::Sgx).unwrap().frontier(), 5);
        assert!(h.state.proposal(3).is_none());
        assert!(h.state.is_finalized(4));

        // stale finalization is ignored
        h.handler.handle_finalized(2, B256::repeat_byte(2));
        assert_eq!(h.state.last_finalized(), (4, B256::repeat_byte(4)));
    }
}
