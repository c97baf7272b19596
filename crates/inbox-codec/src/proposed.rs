use crate::error::CodecError;
use crate::pack::{Packer, Unpacker};
use crate::types::{BlobSlice, Derivation, Proposal, ProposedEventPayload};

/// Fixed part of a proposed event payload, excluding blob hashes.
const FIXED_SIZE: usize = 236;

pub fn proposed_event_size(blob_hashes: usize) -> usize {
    FIXED_SIZE + blob_hashes * 32
}

pub fn encode_proposed_event(payload: &ProposedEventPayload) -> Result<Vec<u8>, CodecError> {
    let proposal = &payload.proposal;
    let derivation = &payload.derivation;
    let blobs = &derivation.blob_slice;
    let mut p = Packer::with_capacity(proposed_event_size(blobs.blob_hashes.len()));

    p.u48("proposal.id", proposal.id)?;
    p.address(&proposal.proposer);
    p.u48("proposal.timestamp", proposal.timestamp)?;
    p.u48(
        "proposal.end_of_submission_window_timestamp",
        proposal.end_of_submission_window_timestamp,
    )?;

    p.u48("derivation.origin_block_number", derivation.origin_block_number)?;
    p.b256(&derivation.origin_block_hash);
    p.bool(derivation.is_forced_inclusion);
    p.u8(derivation.basefee_sharing_pctg);

    p.len24("blob_hashes", blobs.blob_hashes.len())?;
    for hash in &blobs.blob_hashes {
        p.b256(hash);
    }
    p.u24("blob_slice.offset", blobs.offset)?;
    p.u48("blob_slice.timestamp", blobs.timestamp)?;

    p.b256(&proposal.core_state_hash);
    p.b256(&proposal.derivation_hash);

    p.core_state(&payload.core_state)?;

    Ok(p.finish())
}

pub fn decode_proposed_event(data: &[u8]) -> Result<ProposedEventPayload, CodecError> {
    let mut u = Unpacker::new(data);

    let id = u.u48()?;
    let proposer = u.address()?;
    let timestamp = u.u48()?;
    let end_of_submission_window_timestamp = u.u48()?;

    let origin_block_number = u.u48()?;
    let origin_block_hash = u.b256()?;
    let is_forced_inclusion = u.bool()?;
    let basefee_sharing_pctg = u.u8()?;

    let blob_count = u.u24()? as usize;
    let mut blob_hashes = Vec::with_capacity(blob_count.min(data.len() / 32));
    for _ in 0..blob_count {
        blob_hashes.push(u.b256()?);
    }
    let offset = u.u24()?;
    let blob_timestamp = u.u48()?;

    let core_state_hash = u.b256()?;
    let derivation_hash = u.b256()?;
    let core_state = u.core_state()?;
    u.finish()?;

    Ok(ProposedEventPayload {
        proposal: Proposal {
            id,
            timestamp,
            end_of_submission_window_timestamp,
            proposer,
            core_state_hash,
            derivation_hash,
        },
        derivation: Derivation {
            origin_block_number,
            origin_block_hash,
            is_forced_inclusion,
            basefee_sharing_pctg,
            blob_slice: BlobSlice {
                blob_hashes,
                offset,
                timestamp: blob_timestamp,
            },
        },
        core_state,
    })
}
