use crate::error::CodecError;
use crate::pack::{Packer, Unpacker};
use crate::types::{Proposal, ProveInput};

const FIXED_SIZE: usize = 6;
/// Proposal (102) + transition (134) + metadata (40).
const ITEM_SIZE: usize = 276;

pub fn prove_input_size(items: usize) -> usize {
    FIXED_SIZE + items * ITEM_SIZE
}

/// Encodes the calldata payload of a `prove` call. Proposals, transitions and
/// metadata must be index aligned.
pub fn encode_prove_input(input: &ProveInput) -> Result<Vec<u8>, CodecError> {
    if input.proposals.len() != input.transitions.len() {
        return Err(CodecError::LengthMismatch {
            proposals: input.proposals.len(),
            transitions: input.transitions.len(),
        });
    }
    if input.metadata.len() != input.transitions.len() {
        return Err(CodecError::MetadataMismatch {
            metadata: input.metadata.len(),
            transitions: input.transitions.len(),
        });
    }

    let mut p = Packer::with_capacity(prove_input_size(input.proposals.len()));

    p.len24("proposals", input.proposals.len())?;
    for proposal in &input.proposals {
        p.u48("proposal.id", proposal.id)?;
        p.address(&proposal.proposer);
        p.u48("proposal.timestamp", proposal.timestamp)?;
        p.u48(
            "proposal.end_of_submission_window_timestamp",
            proposal.end_of_submission_window_timestamp,
        )?;
        p.b256(&proposal.core_state_hash);
        p.b256(&proposal.derivation_hash);
    }

    p.len24("transitions", input.transitions.len())?;
    for transition in &input.transitions {
        p.transition(transition)?;
    }

    // metadata shares the transitions length prefix
    for metadata in &input.metadata {
        p.metadata(metadata);
    }

    Ok(p.finish())
}

pub fn decode_prove_input(data: &[u8]) -> Result<ProveInput, CodecError> {
    let mut u = Unpacker::new(data);

    let proposal_count = u.u24()? as usize;
    let mut proposals = Vec::with_capacity(proposal_count.min(data.len() / ITEM_SIZE));
    for _ in 0..proposal_count {
        proposals.push(Proposal {
            id: u.u48()?,
            proposer: u.address()?,
            timestamp: u.u48()?,
            end_of_submission_window_timestamp: u.u48()?,
            core_state_hash: u.b256()?,
            derivation_hash: u.b256()?,
        });
    }

    let transition_count = u.u24()? as usize;
    if transition_count != proposal_count {
        return Err(CodecError::LengthMismatch {
            proposals: proposal_count,
            transitions: transition_count,
        });
    }

    let mut transitions = Vec::with_capacity(transition_count);
    for _ in 0..transition_count {
        transitions.push(u.transition()?);
    }
    let mut metadata = Vec::with_capacity(transition_count);
    for _ in 0..transition_count {
        metadata.push(u.metadata()?);
    }
    u.finish()?;

    Ok(ProveInput {
        proposals,
        transitions,
        metadata,
    })
}
