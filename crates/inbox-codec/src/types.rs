use alloy_primitives::{Address, B256};

/// A proposal as recorded by the inbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proposal {
    pub id: u64,
    pub timestamp: u64,
    pub end_of_submission_window_timestamp: u64,
    pub proposer: Address,
    pub core_state_hash: B256,
    pub derivation_hash: B256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobSlice {
    pub blob_hashes: Vec<B256>,
    /// Byte offset into the first blob, encoded as uint24.
    pub offset: u32,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Derivation {
    pub origin_block_number: u64,
    pub origin_block_hash: B256,
    pub is_forced_inclusion: bool,
    pub basefee_sharing_pctg: u8,
    pub blob_slice: BlobSlice,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreState {
    pub next_proposal_id: u64,
    pub next_proposal_block_id: u64,
    pub last_finalized_proposal_id: u64,
    pub last_finalized_transition_hash: B256,
    pub bond_instructions_hash: B256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposedEventPayload {
    pub proposal: Proposal,
    pub derivation: Derivation,
    pub core_state: CoreState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checkpoint {
    pub block_number: u64,
    pub block_hash: B256,
    pub state_root: B256,
}

impl Checkpoint {
    /// An empty checkpoint is encoded as a single flag byte in propose inputs.
    pub fn is_empty(&self) -> bool {
        self.block_number == 0 && self.block_hash.is_zero() && self.state_root.is_zero()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transition {
    pub proposal_hash: B256,
    pub parent_transition_hash: B256,
    pub checkpoint: Checkpoint,
}

/// Highest bond type the inbox emits (liveness).
pub const MAX_BOND_TYPE: u8 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BondInstruction {
    pub proposal_id: u64,
    pub bond_type: u8,
    pub payer: Address,
    pub receiver: Address,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionRecord {
    pub span: u8,
    pub bond_instructions: Vec<BondInstruction>,
    pub transition_hash: B256,
    pub checkpoint_hash: B256,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionMetadata {
    pub designated_prover: Address,
    pub actual_prover: Address,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvedEventPayload {
    pub proposal_id: u64,
    pub transition: Transition,
    pub transition_record: TransitionRecord,
    pub metadata: TransitionMetadata,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobReference {
    pub blob_start_index: u16,
    pub num_blobs: u16,
    pub offset: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposeInput {
    pub deadline: u64,
    pub core_state: CoreState,
    pub parent_proposals: Vec<Proposal>,
    pub blob_reference: BlobReference,
    pub transition_records: Vec<TransitionRecord>,
    pub checkpoint: Checkpoint,
    pub num_forced_inclusions: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProveInput {
    pub proposals: Vec<Proposal>,
    pub transitions: Vec<Transition>,
    pub metadata: Vec<TransitionMetadata>,
}
