use alloy::primitives::B256;
use anyhow::Result;

use crate::chain::L1Client;
use crate::producer::ProofResponse;
use crate::state::ProverState;

/// Whether a buffered proof may still be submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    /// The L1 block the proposal was read from is no longer canonical.
    Reorged { expected: B256, actual: Option<B256> },
    AlreadyFinalized { last_finalized: u64 },
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

pub async fn validate_proof(l1: &dyn L1Client, state: &ProverState, item: &ProofResponse) -> Result<Validity> {
    let expected = item.opts.event_l1_hash;
    let actual = l1.block_hash(item.meta.l1_block_number).await?;
    if actual != Some(expected) {
        return Ok(Validity::Reorged { expected, actual });
    }

    let last_finalized = state.last_finalized_id();
    if item.id <= last_finalized {
        return Ok(Validity::AlreadyFinalized { last_finalized });
    }
    Ok(Validity::Valid)
}
