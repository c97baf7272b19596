use alloy_primitives::{Address, B256};

use crate::error::CodecError;
use crate::types::{BondInstruction, Checkpoint, CoreState, Transition, TransitionMetadata, MAX_BOND_TYPE};

pub const UINT16_MAX: usize = u16::MAX as usize;
pub const UINT24_MAX: usize = (1 << 24) - 1;
pub const UINT48_MAX: u64 = (1 << 48) - 1;

/// Append-only writer for the compact layout.
#[derive(Debug, Default)]
pub struct Packer {
    buf: Vec<u8>,
}

impl Packer {
    pub fn with_capacity(size: usize) -> Self {
        Self {
            buf: Vec::with_capacity(size),
        }
    }

    pub fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn bool(&mut self, value: bool) {
        self.u8(u8::from(value));
    }

    pub fn u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn u24(&mut self, field: &'static str, value: u32) -> Result<(), CodecError> {
        if value as usize > UINT24_MAX {
            return Err(CodecError::ValueOverflow {
                field,
                value: value.into(),
                bits: 24,
            });
        }
        self.buf.extend_from_slice(&value.to_be_bytes()[1..]);
        Ok(())
    }

    pub fn u48(&mut self, field: &'static str, value: u64) -> Result<(), CodecError> {
        if value > UINT48_MAX {
            return Err(CodecError::ValueOverflow { field, value, bits: 48 });
        }
        self.buf.extend_from_slice(&value.to_be_bytes()[2..]);
        Ok(())
    }

    pub fn address(&mut self, value: &Address) {
        self.buf.extend_from_slice(value.as_slice());
    }

    pub fn b256(&mut self, value: &B256) {
        self.buf.extend_from_slice(value.as_slice());
    }

    /// Writes a uint24 array length prefix.
    pub fn len24(&mut self, field: &'static str, len: usize) -> Result<(), CodecError> {
        if len > UINT24_MAX {
            return Err(CodecError::LengthOverflow {
                field,
                len,
                max: UINT24_MAX,
            });
        }
        self.u24(field, len as u32)
    }

    /// Writes a uint16 array length prefix.
    pub fn len16(&mut self, field: &'static str, len: usize) -> Result<(), CodecError> {
        if len > UINT16_MAX {
            return Err(CodecError::LengthOverflow {
                field,
                len,
                max: UINT16_MAX,
            });
        }
        self.u16(len as u16);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over an encoded payload. Every read is bounds checked.
#[derive(Debug)]
pub struct Unpacker<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Unpacker<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(needed).filter(|end| *end <= self.data.len());
        let Some(end) = end else {
            return Err(CodecError::UnexpectedEof {
                offset: self.pos,
                needed,
                len: self.data.len(),
            });
        };
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u24(&mut self) -> Result<u32, CodecError> {
        let b = self.take(3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    pub fn u48(&mut self) -> Result<u64, CodecError> {
        let b = self.take(6)?;
        Ok(u64::from_be_bytes([0, 0, b[0], b[1], b[2], b[3], b[4], b[5]]))
    }

    pub fn address(&mut self) -> Result<Address, CodecError> {
        Ok(Address::from_slice(self.take(20)?))
    }

    pub fn b256(&mut self) -> Result<B256, CodecError> {
        Ok(B256::from_slice(self.take(32)?))
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Fails if any input is left unread.
    pub fn finish(self) -> Result<(), CodecError> {
        match self.data.len() - self.pos {
            0 => Ok(()),
            rest => Err(CodecError::TrailingBytes(rest)),
        }
    }
}

// Structures shared by more than one payload layout.
impl Packer {
    pub(crate) fn core_state(&mut self, state: &CoreState) -> Result<(), CodecError> {
        self.u48("next_proposal_id", state.next_proposal_id)?;
        self.u48("next_proposal_block_id", state.next_proposal_block_id)?;
        self.u48("last_finalized_proposal_id", state.last_finalized_proposal_id)?;
        self.b256(&state.last_finalized_transition_hash);
        self.b256(&state.bond_instructions_hash);
        Ok(())
    }

    pub(crate) fn checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), CodecError> {
        self.u48("checkpoint.block_number", checkpoint.block_number)?;
        self.b256(&checkpoint.block_hash);
        self.b256(&checkpoint.state_root);
        Ok(())
    }

    pub(crate) fn transition(&mut self, transition: &Transition) -> Result<(), CodecError> {
        self.b256(&transition.proposal_hash);
        self.b256(&transition.parent_transition_hash);
        self.checkpoint(&transition.checkpoint)
    }

    pub(crate) fn bond_instruction(&mut self, bond: &BondInstruction) -> Result<(), CodecError> {
        self.u48("bond.proposal_id", bond.proposal_id)?;
        self.u8(bond.bond_type);
        self.address(&bond.payer);
        self.address(&bond.receiver);
        Ok(())
    }

    pub(crate) fn metadata(&mut self, metadata: &TransitionMetadata) {
        self.address(&metadata.designated_prover);
        self.address(&metadata.actual_prover);
    }
}

impl Unpacker<'_> {
    pub(crate) fn core_state(&mut self) -> Result<CoreState, CodecError> {
        Ok(CoreState {
            next_proposal_id: self.u48()?,
            next_proposal_block_id: self.u48()?,
            last_finalized_proposal_id: self.u48()?,
            last_finalized_transition_hash: self.b256()?,
            bond_instructions_hash: self.b256()?,
        })
    }

    pub(crate) fn checkpoint(&mut self) -> Result<Checkpoint, CodecError> {
        Ok(Checkpoint {
            block_number: self.u48()?,
            block_hash: self.b256()?,
            state_root: self.b256()?,
        })
    }

    pub(crate) fn transition(&mut self) -> Result<Transition, CodecError> {
        Ok(Transition {
            proposal_hash: self.b256()?,
            parent_transition_hash: self.b256()?,
            checkpoint: self.checkpoint()?,
        })
    }

    pub(crate) fn bond_instruction(&mut self) -> Result<BondInstruction, CodecError> {
        let proposal_id = self.u48()?;
        let bond_type = self.u8()?;
        if bond_type > MAX_BOND_TYPE {
            return Err(CodecError::InvalidBondType(bond_type));
        }
        Ok(BondInstruction {
            proposal_id,
            bond_type,
            payer: self.address()?,
            receiver: self.address()?,
        })
    }

    pub(crate) fn metadata(&mut self) -> Result<TransitionMetadata, CodecError> {
        Ok(TransitionMetadata {
            designated_prover: self.address()?,
            actual_prover: self.address()?,
        })
    }
}
