use crate::error::CodecError;
use crate::pack::{Packer, Unpacker};
use crate::types::{BlobReference, Checkpoint, Proposal, ProposeInput, TransitionRecord};

const FIXED_SIZE: usize = 103;
const CHECKPOINT_SIZE: usize = 70;
const PROPOSAL_SIZE: usize = 102;
const RECORD_SIZE: usize = 68;
const BOND_SIZE: usize = 47;

/// Encoded size of a propose input. An empty checkpoint costs only its flag byte.
pub fn propose_input_size(input: &ProposeInput) -> usize {
    let checkpoint = if input.checkpoint.is_empty() { 0 } else { CHECKPOINT_SIZE };
    let records: usize = input
        .transition_records
        .iter()
        .map(|r| RECORD_SIZE + r.bond_instructions.len() * BOND_SIZE)
        .sum();
    FIXED_SIZE + checkpoint + input.parent_proposals.len() * PROPOSAL_SIZE + records
}

pub fn encode_propose_input(input: &ProposeInput) -> Result<Vec<u8>, CodecError> {
    let mut p = Packer::with_capacity(propose_input_size(input));

    p.u48("deadline", input.deadline)?;
    p.core_state(&input.core_state)?;

    p.len24("parent_proposals", input.parent_proposals.len())?;
    for proposal in &input.parent_proposals {
        p.u48("proposal.id", proposal.id)?;
        p.u48("proposal.timestamp", proposal.timestamp)?;
        p.u48(
            "proposal.end_of_submission_window_timestamp",
            proposal.end_of_submission_window_timestamp,
        )?;
        p.address(&proposal.proposer);
        p.b256(&proposal.core_state_hash);
        p.b256(&proposal.derivation_hash);
    }

    let blob = &input.blob_reference;
    p.u16(blob.blob_start_index);
    p.u16(blob.num_blobs);
    p.u24("blob_reference.offset", blob.offset)?;

    p.len24("transition_records", input.transition_records.len())?;
    for record in &input.transition_records {
        p.u8(record.span);
        p.len24("bond_instructions", record.bond_instructions.len())?;
        for bond in &record.bond_instructions {
            p.bond_instruction(bond)?;
        }
        p.b256(&record.transition_hash);
        p.b256(&record.checkpoint_hash);
    }

    if input.checkpoint.is_empty() {
        p.u8(0);
    } else {
        p.u8(1);
        p.checkpoint(&input.checkpoint)?;
    }

    p.u8(input.num_forced_inclusions);

    Ok(p.finish())
}

pub fn decode_propose_input(data: &[u8]) -> Result<ProposeInput, CodecError> {
    let mut u = Unpacker::new(data);

    let deadline = u.u48()?;
    let core_state = u.core_state()?;

    let proposal_count = u.u24()? as usize;
    let mut parent_proposals = Vec::with_capacity(proposal_count.min(data.len() / PROPOSAL_SIZE));
    for _ in 0..proposal_count {
        parent_proposals.push(Proposal {
            id: u.u48()?,
            timestamp: u.u48()?,
            end_of_submission_window_timestamp: u.u48()?,
            proposer: u.address()?,
            core_state_hash: u.b256()?,
            derivation_hash: u.b256()?,
        });
    }

    let blob_reference = BlobReference {
        blob_start_index: u.u16()?,
        num_blobs: u.u16()?,
        offset: u.u24()?,
    };

    let record_count = u.u24()? as usize;
    let mut transition_records = Vec::with_capacity(record_count.min(data.len() / RECORD_SIZE));
    for _ in 0..record_count {
        let span = u.u8()?;
        let bond_count = u.u24()? as usize;
        let mut bond_instructions = Vec::with_capacity(bond_count.min(data.len() / BOND_SIZE));
        for _ in 0..bond_count {
            bond_instructions.push(u.bond_instruction()?);
        }
        transition_records.push(TransitionRecord {
            span,
            bond_instructions,
            transition_hash: u.b256()?,
            checkpoint_hash: u.b256()?,
        });
    }

    let checkpoint = match u.u8()? {
        0 => Checkpoint::default(),
        1 => u.checkpoint()?,
        flag => return Err(CodecError::InvalidCheckpointFlag(flag)),
    };

    let num_forced_inclusions = u.u8()?;
    u.finish()?;

    Ok(ProposeInput {
        deadline,
        core_state,
        parent_proposals,
        blob_reference,
        transition_records,
        checkpoint,
        num_forced_inclusions,
    })
}
