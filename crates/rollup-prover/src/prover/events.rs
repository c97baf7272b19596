use alloy_primitives::B256;
use inbox_codec::{decode_proposed_event, decode_proved_event, CodecError, ProposedEventPayload, ProvedEventPayload};

use crate::chain::{InboxEventKind, RawInboxEvent};

/// Everything the event loop reacts to on the chain side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    Proposed {
        payload: ProposedEventPayload,
        l1_block_number: u64,
        l1_block_hash: B256,
    },
    Proved {
        payload: ProvedEventPayload,
        l1_block_number: u64,
    },
    Finalized {
        proposal_id: u64,
        transition_hash: B256,
    },
    /// The proving window of a proposal owned by another prover ran out.
    AssignmentExpired { proposal_id: u64 },
}

impl ChainEvent {
    pub fn decode(raw: &RawInboxEvent) -> Result<Self, CodecError> {
        Ok(match raw.kind {
            InboxEventKind::Proposed => Self::Proposed {
                payload: decode_proposed_event(&raw.data)?,
                l1_block_number: raw.block_number,
                l1_block_hash: raw.block_hash,
            },
            InboxEventKind::Proved => Self::Proved {
                payload: decode_proved_event(&raw.data)?,
                l1_block_number: raw.block_number,
            },
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Proposed { .. } => "proposed",
            Self::Proved { .. } => "proved",
            Self::Finalized { .. } => "finalized",
            Self::AssignmentExpired { .. } => "assignment expired",
        }
    }
}
