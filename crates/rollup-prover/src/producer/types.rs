use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, B256};
use inbox_codec::{hash_proposal, Checkpoint, Proposal, Transition, TransitionMetadata};
use serde::{Deserialize, Serialize};

use super::error::ProducerError;

/// Proof systems understood by the inbox verifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofType {
    /// Optimistic, no proof at all.
    Op,
    #[default]
    Sgx,
    Native,
    Pivot,
    Risc0,
    Sp1,
    /// Whichever zkVM the backend draws.
    ZkAny,
}

impl ProofType {
    pub const ALL: [ProofType; 7] = [
        Self::Op,
        Self::Sgx,
        Self::Native,
        Self::Pivot,
        Self::Risc0,
        Self::Sp1,
        Self::ZkAny,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Op => "op",
            Self::Sgx => "sgx",
            Self::Native => "native",
            Self::Pivot => "pivot",
            Self::Risc0 => "risc0",
            Self::Sp1 => "sp1",
            Self::ZkAny => "zk_any",
        }
    }
}

impl fmt::Display for ProofType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProofType {
    type Err = ProducerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProducerError::UnknownProofType(s.to_string()))
    }
}

/// On-chain verifier per proof type.
#[derive(Debug, Clone, Default)]
pub struct Verifiers(BTreeMap<ProofType, Address>);

impl Verifiers {
    pub fn new(map: BTreeMap<ProofType, Address>) -> Self {
        Self(map)
    }

    pub fn resolve(&self, proof_type: ProofType) -> Result<Address, ProducerError> {
        self.0
            .get(&proof_type)
            .copied()
            .ok_or(ProducerError::MissingVerifier(proof_type))
    }
}

/// A proposal together with the L1 block it was observed in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposalMeta {
    pub proposal: Proposal,
    pub l1_block_number: u64,
    pub l1_block_hash: B256,
}

impl ProposalMeta {
    pub fn id(&self) -> u64 {
        self.proposal.id
    }
}

/// Everything the backend needs to prove a single proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofRequestOptions {
    pub proposal_id: u64,
    pub prover_address: Address,
    pub designated_prover: Address,
    pub event_l1_hash: B256,
    /// L1 block the proposal was included in, used to address backend tasks.
    pub l1_inclusion_block_number: u64,
    pub proposal_hash: B256,
    pub parent_transition_hash: B256,
    pub checkpoint: Checkpoint,
}

impl ProofRequestOptions {
    pub fn new(
        meta: &ProposalMeta,
        prover_address: Address,
        parent_transition_hash: B256,
        checkpoint: Checkpoint,
    ) -> Self {
        Self {
            proposal_id: meta.id(),
            prover_address,
            designated_prover: meta.proposal.proposer,
            event_l1_hash: meta.l1_block_hash,
            l1_inclusion_block_number: meta.l1_block_number,
            proposal_hash: hash_proposal(&meta.proposal),
            parent_transition_hash,
            checkpoint,
        }
    }

    pub fn transition(&self) -> Transition {
        Transition {
            proposal_hash: self.proposal_hash,
            parent_transition_hash: self.parent_transition_hash,
            checkpoint: self.checkpoint,
        }
    }

    pub fn metadata(&self) -> TransitionMetadata {
        TransitionMetadata {
            designated_prover: self.designated_prover,
            actual_prover: self.prover_address,
        }
    }
}

/// A request to prove one proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofRequest {
    pub meta: ProposalMeta,
}

impl ProofRequest {
    pub fn new(meta: ProposalMeta) -> Self {
        Self { meta }
    }

    pub fn id(&self) -> u64 {
        self.meta.id()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofResponse {
    pub id: u64,
    pub meta: ProposalMeta,
    pub proof: Vec<u8>,
    pub opts: ProofRequestOptions,
    pub proof_type: ProofType,
    /// Child responses of a composite producer, in child order.
    pub parts: Vec<ProofResponse>,
}

impl ProofResponse {
    pub fn new(id: u64, meta: &ProposalMeta, opts: &ProofRequestOptions, proof: Vec<u8>, proof_type: ProofType) -> Self {
        Self {
            id,
            meta: meta.clone(),
            proof,
            opts: opts.clone(),
            proof_type,
            parts: Vec::new(),
        }
    }
}

/// An extra proof verified next to the primary aggregated proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubProof {
    pub proof_type: ProofType,
    pub verifier: Address,
    pub proof: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProofs {
    pub proof_responses: Vec<ProofResponse>,
    pub aggregated_proof: Vec<u8>,
    pub ids: Vec<u64>,
    pub proof_type: ProofType,
    pub verifier: Address,
    pub sub_proofs: Vec<SubProof>,
}

impl BatchProofs {
    pub fn new(items: &[ProofResponse], aggregated_proof: Vec<u8>, proof_type: ProofType, verifier: Address) -> Self {
        Self {
            proof_responses: items.to_vec(),
            aggregated_proof,
            ids: items.iter().map(|r| r.id).collect(),
            proof_type,
            verifier,
            sub_proofs: Vec::new(),
        }
    }

    pub fn highest_id(&self) -> Option<u64> {
        self.ids.iter().copied().max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proof_type_string_roundtrip() {
        for t in ProofType::ALL {
            assert_eq!(t.to_string().parse::<ProofType>().unwrap(), t);
        }
        assert_eq!(ProofType::ZkAny.to_string(), "zk_any");
        assert!(matches!(
            "groth16".parse::<ProofType>(),
            Err(ProducerError::UnknownProofType(s)) if s == "groth16"
        ));
    }

    #[test]
    fn test_proof_type_yaml_names_match_display() {
        let yaml = serde_yaml::to_string(&ProofType::ZkAny).unwrap();
        assert_eq!(yaml.trim(), "zk_any");
        let parsed: ProofType = serde_yaml::from_str("risc0").unwrap();
        assert_eq!(parsed, ProofType::Risc0);
    }

    #[test]
    fn test_verifier_resolution() {
        let sgx = Address::repeat_byte(0x51);
        let verifiers = Verifiers::new(BTreeMap::from([(ProofType::Sgx, sgx)]));
        assert_eq!(verifiers.resolve(ProofType::Sgx).unwrap(), sgx);
        assert!(matches!(
            verifiers.resolve(ProofType::Sp1),
            Err(ProducerError::MissingVerifier(ProofType::Sp1))
        ));
    }

    #[test]
    fn test_request_options_build_transition() {
        let meta = ProposalMeta {
            proposal: Proposal {
                id: 3,
                proposer: Address::repeat_byte(0x01),
                ..Default::default()
            },
            l1_block_number: 10,
            l1_block_hash: B256::repeat_byte(0x0a),
        };
        let prover = Address::repeat_byte(0x02);
        let opts = ProofRequestOptions::new(&meta, prover, B256::repeat_byte(0x0b), Checkpoint::default());

        assert_eq!(opts.proposal_hash, hash_proposal(&meta.proposal));
        assert_eq!(opts.l1_inclusion_block_number, 10);
        assert_eq!(opts.transition().parent_transition_hash, B256::repeat_byte(0x0b));
        assert_eq!(opts.metadata().designated_prover, meta.proposal.proposer);
        assert_eq!(opts.metadata().actual_prover, prover);
    }
}
