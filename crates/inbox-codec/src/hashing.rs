//! Keccak hashes over the fixed-width word layout used by the inbox.

use alloy_primitives::{Address, B256, Keccak256};

use crate::types::{Checkpoint, CoreState, Proposal, Transition};

fn word(value: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&value.to_be_bytes());
    out
}

fn address_word(address: &Address) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(address.as_slice());
    out
}

pub fn hash_checkpoint(checkpoint: &Checkpoint) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(word(checkpoint.block_number));
    hasher.update(checkpoint.block_hash);
    hasher.update(checkpoint.state_root);
    hasher.finalize()
}

pub fn hash_transition(transition: &Transition) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(transition.proposal_hash);
    hasher.update(transition.parent_transition_hash);
    hasher.update(hash_checkpoint(&transition.checkpoint));
    hasher.finalize()
}

pub fn hash_core_state(state: &CoreState) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(word(state.next_proposal_id));
    hasher.update(word(state.next_proposal_block_id));
    hasher.update(word(state.last_finalized_proposal_id));
    hasher.update(state.last_finalized_transition_hash);
    hasher.update(state.bond_instructions_hash);
    hasher.finalize()
}

/// Proposal hash. The first word packs id, timestamp and end of submission
/// window as three big-endian uint48 values, left aligned.
pub fn hash_proposal(proposal: &Proposal) -> B256 {
    let mut packed = [0u8; 32];
    packed[0..6].copy_from_slice(&proposal.id.to_be_bytes()[2..]);
    packed[6..12].copy_from_slice(&proposal.timestamp.to_be_bytes()[2..]);
    packed[12..18].copy_from_slice(&proposal.end_of_submission_window_timestamp.to_be_bytes()[2..]);

    let mut hasher = Keccak256::new();
    hasher.update(packed);
    hasher.update(address_word(&proposal.proposer));
    hasher.update(proposal.core_state_hash);
    hasher.update(proposal.derivation_hash);
    hasher.finalize()
}

/// Storage key of a transition record.
pub fn compose_transition_key(proposal_id: u64, parent_transition_hash: &B256) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(word(proposal_id));
    hasher.update(parent_transition_hash);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use alloy_primitives::keccak256;

    use super::*;

    #[test]
    fn test_checkpoint_hash_matches_abi_words() {
        let checkpoint = Checkpoint {
            block_number: 0x0102,
            block_hash: B256::repeat_byte(0xaa),
            state_root: B256::repeat_byte(0xbb),
        };
        let mut preimage = vec![0u8; 30];
        preimage.extend_from_slice(&[0x01, 0x02]);
        preimage.extend_from_slice(&[0xaa; 32]);
        preimage.extend_from_slice(&[0xbb; 32]);
        assert_eq!(hash_checkpoint(&checkpoint), keccak256(&preimage));
    }

    #[test]
    fn test_transition_hash_chains_checkpoint() {
        let transition = Transition {
            proposal_hash: B256::repeat_byte(0x01),
            parent_transition_hash: B256::repeat_byte(0x02),
            checkpoint: Checkpoint::default(),
        };
        let mut preimage = Vec::new();
        preimage.extend_from_slice(&[0x01; 32]);
        preimage.extend_from_slice(&[0x02; 32]);
        preimage.extend_from_slice(hash_checkpoint(&Checkpoint::default()).as_slice());
        assert_eq!(hash_transition(&transition), keccak256(&preimage));
    }

    #[test]
    fn test_proposal_hash_packs_first_word() {
        let proposal = Proposal {
            id: 1,
            timestamp: 2,
            end_of_submission_window_timestamp: 3,
            proposer: Address::repeat_byte(0x44),
            core_state_hash: B256::repeat_byte(0x55),
            derivation_hash: B256::repeat_byte(0x66),
        };
        let mut preimage = vec![0u8; 128];
        preimage[5] = 1;
        preimage[11] = 2;
        preimage[17] = 3;
        preimage[44..64].copy_from_slice(&[0x44; 20]);
        preimage[64..96].copy_from_slice(&[0x55; 32]);
        preimage[96..128].copy_from_slice(&[0x66; 32]);
        assert_eq!(hash_proposal(&proposal), keccak256(&preimage));

        let mut other = proposal.clone();
        other.timestamp = 4;
        assert_ne!(hash_proposal(&proposal), hash_proposal(&other));
    }

    #[test]
    fn test_core_state_and_transition_key_differ_by_input() {
        let a = CoreState::default();
        let b = CoreState {
            next_proposal_id: 1,
            ..CoreState::default()
        };
        assert_ne!(hash_core_state(&a), hash_core_state(&b));
        assert_ne!(
            compose_transition_key(1, &B256::ZERO),
            compose_transition_key(2, &B256::ZERO)
        );
    }
}
