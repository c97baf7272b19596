use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use super::{BufferError, ProofBuffer};
use crate::producer::{ProofResponse, ProofType};

/// Proofs that arrived ahead of the frontier, keyed by proposal id.
#[derive(Debug, Default)]
pub struct ProofCache {
    entries: BTreeMap<u64, ProofResponse>,
}

impl ProofCache {
    /// Stores a proof, replacing any earlier proof for the same id.
    pub fn insert(&mut self, item: ProofResponse) {
        self.entries.insert(item.id, item);
    }

    pub fn remove(&mut self, id: u64) -> Option<ProofResponse> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    /// Drops every entry below `id` and returns how many were dropped.
    pub fn drop_below(&mut self, id: u64) -> usize {
        let kept = self.entries.split_off(&id);
        let dropped = self.entries.len();
        self.entries = kept;
        dropped
    }

    pub fn ids(&self) -> Vec<u64> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of routing a finished proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Matched the frontier and was appended to the buffer.
    Buffered,
    /// Ahead of the frontier, parked in the cache.
    Cached,
    /// Already in the buffer.
    Duplicate,
}

#[derive(Debug)]
struct LaneState {
    buffer: ProofBuffer,
    cache: ProofCache,
    /// Next id the buffer accepts.
    frontier: u64,
    /// Ids above the frontier that were proven in another lane.
    resolved: BTreeSet<u64>,
}

impl LaneState {
    /// Steps the frontier past ids that need nothing more from this lane.
    fn skip_settled(&mut self) {
        loop {
            if self.resolved.remove(&self.frontier) || self.buffer.contains(self.frontier) {
                self.frontier += 1;
            } else {
                break;
            }
        }
    }
}

/// Buffer, cache and frontier of one proof type, guarded by a single mutex.
#[derive(Debug)]
pub struct ProofLane {
    proof_type: ProofType,
    state: Mutex<LaneState>,
}

impl ProofLane {
    pub fn new(proof_type: ProofType, max_length: usize, frontier: u64) -> Self {
        Self {
            proof_type,
            state: Mutex::new(LaneState {
                buffer: ProofBuffer::new(max_length),
                cache: ProofCache::default(),
                frontier,
                resolved: BTreeSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LaneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn proof_type(&self) -> ProofType {
        self.proof_type
    }

    /// Appends the proof if it is next in line, otherwise parks it in the cache.
    pub fn handle_proof_response(&self, item: ProofResponse) -> Result<Admission, BufferError> {
        let mut state = self.lock();
        if state.buffer.contains(item.id) {
            return Ok(Admission::Duplicate);
        }
        if item.id != state.frontier {
            debug!(
                "caching {} proof {} ahead of frontier {}",
                self.proof_type, item.id, state.frontier
            );
            state.cache.insert(item);
            return Ok(Admission::Cached);
        }

        let id = item.id;
        state.buffer.write(item)?;
        state.cache.remove(id);
        state.frontier = id + 1;
        state.skip_settled();
        Ok(Admission::Buffered)
    }

    /// Moves contiguous cached proofs into the buffer. Returns how many moved.
    pub fn flush_cache(&self) -> usize {
        let mut state = self.lock();
        let frontier = state.frontier;
        state.cache.drop_below(frontier);

        let mut moved = 0;
        loop {
            state.skip_settled();
            let frontier = state.frontier;
            let Some(item) = state.cache.remove(frontier) else {
                break;
            };
            if state.buffer.is_full() {
                state.cache.insert(item);
                break;
            }
            match state.buffer.write(item) {
                Ok(_) => {
                    state.frontier = frontier + 1;
                    moved += 1;
                }
                Err(e) => {
                    debug!("dropping cached {} proof {frontier}: {e}", self.proof_type);
                    break;
                }
            }
        }
        if moved > 0 {
            debug!(
                "flushed {moved} cached {} proofs, frontier now {}",
                self.proof_type, state.frontier
            );
        }
        moved
    }

    /// Moves the frontier forward to `to`, dropping anything cached below it.
    pub fn advance_frontier(&self, to: u64) {
        let mut state = self.lock();
        if to > state.frontier {
            state.frontier = to;
        }
        let frontier = state.frontier;
        state.cache.drop_below(frontier);
        state.resolved.retain(|id| *id >= frontier);
        state.skip_settled();
    }

    /// Moves the frontier back so re-requested proofs for `ids` are admitted
    /// again. Every other id the frontier had already passed stays settled.
    pub fn reopen(&self, ids: &[u64]) {
        let Some(&lowest) = ids.iter().min() else {
            return;
        };
        let mut state = self.lock();
        if lowest < state.frontier {
            debug!("rewinding {} frontier from {} to {lowest}", self.proof_type, state.frontier);
            for id in lowest..state.frontier {
                if !ids.contains(&id) {
                    state.resolved.insert(id);
                }
            }
            state.frontier = lowest;
        }
        for id in ids {
            state.resolved.remove(id);
        }
    }

    /// Records that `id` was settled outside this lane.
    pub fn mark_resolved(&self, id: u64) {
        let mut state = self.lock();
        if id < state.frontier {
            return;
        }
        state.resolved.insert(id);
        state.skip_settled();
    }

    pub fn frontier(&self) -> u64 {
        self.lock().frontier
    }

    pub fn read_all(&self) -> Vec<ProofResponse> {
        self.lock().buffer.read_all()
    }

    pub fn buffered_ids(&self) -> Vec<u64> {
        self.lock().buffer.ids()
    }

    pub fn cached_ids(&self) -> Vec<u64> {
        self.lock().cache.ids()
    }

    pub fn buffer_len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn clear_items(&self, ids: &[u64]) -> usize {
        self.lock().buffer.clear_items(ids)
    }

    pub fn is_aggregating(&self) -> bool {
        self.lock().buffer.is_aggregating()
    }

    pub fn reset_aggregating(&self) {
        self.lock().buffer.reset_aggregating();
    }

    /// Claims the buffer for aggregation if it is full or its oldest proof
    /// has waited `forced_interval`. A zero interval disables the time trigger.
    pub fn try_begin_aggregation(&self, forced_interval: Duration, now: Instant) -> bool {
        let mut state = self.lock();
        let buffer = &mut state.buffer;
        if buffer.is_empty() || buffer.is_aggregating() {
            return false;
        }
        let overdue = !forced_interval.is_zero()
            && buffer
                .first_item_at()
                .is_some_and(|first| now.saturating_duration_since(first) >= forced_interval);
        if !buffer.is_full() && !overdue {
            return false;
        }
        buffer.mark_aggregating();
        true
    }
}

/// Every lane of the prover, fixed at startup.
#[derive(Debug)]
pub struct ProofLanes {
    lanes: HashMap<ProofType, Arc<ProofLane>>,
}

impl ProofLanes {
    pub fn new(proof_types: &[ProofType], max_length: usize, frontier: u64) -> Self {
        let lanes = proof_types
            .iter()
            .map(|t| (*t, Arc::new(ProofLane::new(*t, max_length, frontier))))
            .collect();
        Self { lanes }
    }

    pub fn get(&self, proof_type: ProofType) -> Result<&Arc<ProofLane>, BufferError> {
        self.lanes
            .get(&proof_type)
            .ok_or(BufferError::UnknownLane(proof_type))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProofLane>> {
        self.lanes.values()
    }

    /// Routes a proof to its lane. The other lanes stop waiting for its id.
    pub fn handle_proof_response(&self, item: ProofResponse) -> Result<Admission, BufferError> {
        let id = item.id;
        let proof_type = item.proof_type;
        let admission = self.get(proof_type)?.handle_proof_response(item)?;
        self.mark_resolved_except(id, Some(proof_type));
        Ok(admission)
    }

    /// Lets every lane but `except` step past `id`.
    pub fn mark_resolved_except(&self, id: u64, except: Option<ProofType>) {
        for lane in self.lanes.values() {
            if Some(lane.proof_type()) != except {
                lane.mark_resolved(id);
            }
        }
    }

    pub fn advance_all(&self, to: u64) {
        for lane in self.lanes.values() {
            lane.advance_frontier(to);
        }
    }

    pub fn reopen_all(&self, ids: &[u64]) {
        for lane in self.lanes.values() {
            lane.reopen(ids);
        }
    }
}
