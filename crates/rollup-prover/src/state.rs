//! Chain facts shared between the event handlers and the submitter.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use alloy_primitives::B256;
use inbox_codec::{hash_transition, ProvedEventPayload};

use crate::producer::ProposalMeta;

/// The newest L1 block the prover has processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct L1Cursor {
    pub number: u64,
    pub hash: B256,
}

/// A transition proven on chain for one proposal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OnchainRecord {
    pub parent_transition_hash: B256,
    pub transition_hash: B256,
    pub checkpoint_hash: B256,
    pub span: u8,
}

impl From<&ProvedEventPayload> for OnchainRecord {
    fn from(event: &ProvedEventPayload) -> Self {
        Self {
            parent_transition_hash: event.transition.parent_transition_hash,
            transition_hash: event.transition_record.transition_hash,
            checkpoint_hash: event.transition_record.checkpoint_hash,
            span: event.transition_record.span,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    last_finalized_id: u64,
    last_finalized_hash: B256,
    last_handled_id: u64,
    l1_current: L1Cursor,
    records: BTreeMap<u64, OnchainRecord>,
    local_transitions: BTreeMap<u64, B256>,
    proposals: BTreeMap<u64, ProposalMeta>,
    rescan_from: Option<u64>,
}

#[derive(Debug, Default)]
pub struct ProverState {
    inner: Mutex<Inner>,
}

impl ProverState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_finalized_id(&self) -> u64 {
        self.lock().last_finalized_id
    }

    pub fn last_finalized(&self) -> (u64, B256) {
        let inner = self.lock();
        (inner.last_finalized_id, inner.last_finalized_hash)
    }

    /// Records a newer finalized proposal. Returns false if `id` is not ahead
    /// of the current one.
    pub fn set_last_finalized(&self, id: u64, transition_hash: B256) -> bool {
        let mut inner = self.lock();
        if id <= inner.last_finalized_id && !(id == 0 && inner.last_finalized_hash.is_zero()) {
            return false;
        }
        inner.last_finalized_id = id;
        inner.last_finalized_hash = transition_hash;
        true
    }

    pub fn is_finalized(&self, id: u64) -> bool {
        id <= self.lock().last_finalized_id
    }

    pub fn last_handled_id(&self) -> u64 {
        self.lock().last_handled_id
    }

    pub fn set_last_handled(&self, id: u64) {
        let mut inner = self.lock();
        inner.last_handled_id = inner.last_handled_id.max(id);
    }

    /// Lets proposals from `id` onwards be handled again.
    pub fn rewind_last_handled(&self, id: u64) {
        let mut inner = self.lock();
        inner.last_handled_id = inner.last_handled_id.min(id.saturating_sub(1));
    }

    pub fn l1_current(&self) -> L1Cursor {
        self.lock().l1_current
    }

    pub fn set_l1_current(&self, cursor: L1Cursor) {
        self.lock().l1_current = cursor;
    }

    /// Asks the inbox watcher to scan again from `from_block`.
    pub fn request_rescan(&self, from_block: u64) {
        let mut inner = self.lock();
        inner.rescan_from = Some(inner.rescan_from.map_or(from_block, |b| b.min(from_block)));
    }

    pub fn take_rescan(&self) -> Option<u64> {
        self.lock().rescan_from.take()
    }

    pub fn set_record(&self, proposal_id: u64, record: OnchainRecord) {
        self.lock().records.insert(proposal_id, record);
    }

    pub fn record(&self, proposal_id: u64) -> Option<OnchainRecord> {
        self.lock().records.get(&proposal_id).copied()
    }

    /// Stores the transition hash this prover built for `proposal_id`.
    pub fn set_local_transition(&self, proposal_id: u64, transition: &inbox_codec::Transition) {
        self.lock()
            .local_transitions
            .insert(proposal_id, hash_transition(transition));
    }

    /// The transition hash a proof for `proposal_id` must build on.
    ///
    /// The proposal right after the finalized one builds on the finalized
    /// hash. Later proposals use the on-chain record of their predecessor, or
    /// the transition this prover built for it.
    pub fn parent_transition_hash(&self, proposal_id: u64) -> Option<B256> {
        let inner = self.lock();
        if proposal_id == 0 || proposal_id <= inner.last_finalized_id {
            return None;
        }
        if proposal_id == inner.last_finalized_id + 1 {
            return Some(inner.last_finalized_hash);
        }
        let parent = proposal_id - 1;
        inner
            .records
            .get(&parent)
            .map(|r| r.transition_hash)
            .or_else(|| inner.local_transitions.get(&parent).copied())
    }

    /// Whether the on-chain record of `proposal_id` builds on the expected
    /// parent. `None` when there is no record or the parent is unknown.
    pub fn record_is_valid(&self, proposal_id: u64) -> Option<bool> {
        let record = self.record(proposal_id)?;
        let parent = self.parent_transition_hash(proposal_id)?;
        Some(record.parent_transition_hash == parent)
    }

    pub fn remember_proposal(&self, meta: ProposalMeta) {
        self.lock().proposals.insert(meta.id(), meta);
    }

    pub fn proposal(&self, id: u64) -> Option<ProposalMeta> {
        self.lock().proposals.get(&id).cloned()
    }

    /// Forgets everything at or below `upto`.
    pub fn prune(&self, upto: u64) -> usize {
        let mut inner = self.lock();
        let keep = upto.saturating_add(1);
        let before = inner.records.len() + inner.local_transitions.len() + inner.proposals.len();
        inner.records = inner.records.split_off(&keep);
        inner.local_transitions = inner.local_transitions.split_off(&keep);
        inner.proposals = inner.proposals.split_off(&keep);
        before - (inner.records.len() + inner.local_transitions.len() + inner.proposals.len())
    }
}
