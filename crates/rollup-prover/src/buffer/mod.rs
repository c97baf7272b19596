//! Per proof type staging of finished proofs ahead of aggregation.

use std::time::Instant;

use thiserror::Error;

use crate::producer::{ProofResponse, ProofType};

pub mod cache;
pub mod monitor;

pub use cache::{Admission, ProofCache, ProofLane, ProofLanes};
pub use monitor::{try_aggregate, BufferMonitor};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("proof response has a zero proposal id")]
    ZeroId,
    #[error("proof buffer is full ({max} items)")]
    Overflow { max: usize },
    #[error("requested {requested} items but buffer holds {available}")]
    InsufficientItems { requested: usize, available: usize },
    #[error("no proof lane for proof type {0}")]
    UnknownLane(ProofType),
}

/// Bounded list of proofs waiting to be aggregated, ordered by proposal id.
#[derive(Debug)]
pub struct ProofBuffer {
    max_length: usize,
    items: Vec<ProofResponse>,
    first_item_at: Option<Instant>,
    is_aggregating: bool,
}

impl ProofBuffer {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            items: Vec::with_capacity(max_length),
            first_item_at: None,
            is_aggregating: false,
        }
    }

    /// Inserts a proof in id order. Writing an id that is already buffered is a no-op.
    pub fn write(&mut self, item: ProofResponse) -> Result<usize, BufferError> {
        if item.id == 0 {
            return Err(BufferError::ZeroId);
        }
        if self.contains(item.id) {
            return Ok(self.items.len());
        }
        if self.items.len() >= self.max_length {
            return Err(BufferError::Overflow { max: self.max_length });
        }
        if self.items.is_empty() {
            self.first_item_at = Some(Instant::now());
        }
        let pos = self.items.partition_point(|existing| existing.id < item.id);
        self.items.insert(pos, item);
        Ok(self.items.len())
    }

    /// Returns the first `n` items without removing them.
    pub fn read(&self, n: usize) -> Result<Vec<ProofResponse>, BufferError> {
        if n > self.items.len() {
            return Err(BufferError::InsufficientItems {
                requested: n,
                available: self.items.len(),
            });
        }
        Ok(self.items[..n].to_vec())
    }

    pub fn read_all(&self) -> Vec<ProofResponse> {
        self.items.clone()
    }

    /// Removes the given ids and returns how many were present. Always ends
    /// the current aggregation.
    pub fn clear_items(&mut self, ids: &[u64]) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !ids.contains(&item.id));
        let removed = before - self.items.len();

        self.is_aggregating = false;
        self.first_item_at = if self.items.is_empty() {
            None
        } else if removed > 0 {
            // the survivors start a new batch window
            Some(Instant::now())
        } else {
            self.first_item_at
        };
        removed
    }

    pub fn contains(&self, id: u64) -> bool {
        self.items.iter().any(|item| item.id == id)
    }

    pub fn ids(&self) -> Vec<u64> {
        self.items.iter().map(|item| item.id).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.max_length
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn first_item_at(&self) -> Option<Instant> {
        self.first_item_at
    }

    pub fn is_aggregating(&self) -> bool {
        self.is_aggregating
    }

    pub fn mark_aggregating(&mut self) {
        self.is_aggregating = true;
    }

    pub fn reset_aggregating(&mut self) {
        self.is_aggregating = false;
    }
}
