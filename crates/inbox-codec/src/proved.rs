use crate::error::CodecError;
use crate::pack::{Packer, Unpacker};
use crate::types::{ProvedEventPayload, TransitionRecord};

const FIXED_SIZE: usize = 247;
const BOND_SIZE: usize = 47;

pub fn proved_event_size(bond_instructions: usize) -> usize {
    FIXED_SIZE + bond_instructions * BOND_SIZE
}

pub fn encode_proved_event(payload: &ProvedEventPayload) -> Result<Vec<u8>, CodecError> {
    let record = &payload.transition_record;
    let mut p = Packer::with_capacity(proved_event_size(record.bond_instructions.len()));

    p.u48("proposal_id", payload.proposal_id)?;
    p.transition(&payload.transition)?;

    p.u8(record.span);
    p.b256(&record.transition_hash);
    p.b256(&record.checkpoint_hash);

    p.metadata(&payload.metadata);

    p.len16("bond_instructions", record.bond_instructions.len())?;
    for bond in &record.bond_instructions {
        p.bond_instruction(bond)?;
    }

    Ok(p.finish())
}

pub fn decode_proved_event(data: &[u8]) -> Result<ProvedEventPayload, CodecError> {
    let mut u = Unpacker::new(data);

    let proposal_id = u.u48()?;
    let transition = u.transition()?;
    let span = u.u8()?;
    let transition_hash = u.b256()?;
    let checkpoint_hash = u.b256()?;
    let metadata = u.metadata()?;

    let bond_count = u.u16()? as usize;
    let mut bond_instructions = Vec::with_capacity(bond_count);
    for _ in 0..bond_count {
        bond_instructions.push(u.bond_instruction()?);
    }
    u.finish()?;

    Ok(ProvedEventPayload {
        proposal_id,
        transition,
        transition_record: TransitionRecord {
            span,
            bond_instructions,
            transition_hash,
            checkpoint_hash,
        },
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, B256};

    use super::*;
    use crate::types::{BondInstruction, Checkpoint, Transition, TransitionMetadata};

    fn payload(bonds: usize) -> ProvedEventPayload {
        ProvedEventPayload {
            proposal_id: 7,
            transition: Transition {
                proposal_hash: B256::repeat_byte(0x01),
                parent_transition_hash: B256::repeat_byte(0x02),
                checkpoint: Checkpoint {
                    block_number: 512,
                    block_hash: B256::repeat_byte(0x03),
                    state_root: B256::repeat_byte(0x04),
                },
            },
            transition_record: TransitionRecord {
                span: 1,
                bond_instructions: (0..bonds)
                    .map(|i| BondInstruction {
                        proposal_id: 7 - i as u64,
                        bond_type: (i % 3) as u8,
                        payer: Address::repeat_byte(0x10),
                        receiver: Address::repeat_byte(0x20),
                    })
                    .collect(),
                transition_hash: B256::repeat_byte(0x05),
                checkpoint_hash: B256::repeat_byte(0x06),
            },
            metadata: TransitionMetadata {
                designated_prover: Address::repeat_byte(0x30),
                actual_prover: Address::repeat_byte(0x40),
            },
        }
    }

    #[test]
    fn test_proved_event_roundtrip() {
        for bonds in [0, 1, 5] {
            let original = payload(bonds);
            let encoded = encode_proved_event(&original).unwrap();
            assert_eq!(encoded.len(), proved_event_size(bonds));
            assert_eq!(decode_proved_event(&encoded).unwrap(), original);
        }
    }

    #[test]
    fn test_proved_event_bond_count_is_uint16() {
        let encoded = encode_proved_event(&payload(2)).unwrap();
        let prefix = FIXED_SIZE - 2;
        assert_eq!(&encoded[prefix..prefix + 2], &[0, 2]);
    }

    #[test]
    fn test_proved_event_trailing_bytes() {
        let mut encoded = encode_proved_event(&payload(0)).unwrap();
        encoded.push(0);
        assert_eq!(decode_proved_event(&encoded), Err(CodecError::TrailingBytes(1)));
    }

    #[test]
    fn test_proved_event_rejects_unknown_bond_type() {
        let mut encoded = encode_proved_event(&payload(1)).unwrap();
        // bond type follows the uint48 proposal id
        encoded[FIXED_SIZE + 6] = 3;
        assert_eq!(decode_proved_event(&encoded), Err(CodecError::InvalidBondType(3)));
    }

    #[test]
    fn test_proved_event_missing_bond() {
        let mut encoded = encode_proved_event(&payload(1)).unwrap();
        encoded.truncate(FIXED_SIZE);
        assert!(matches!(
            decode_proved_event(&encoded),
            Err(CodecError::UnexpectedEof { offset, .. }) if offset == FIXED_SIZE
        ));
    }
}
