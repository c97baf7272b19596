use alloy::primitives::{Address, Bytes};
use alloy::sol_types::{SolCall, SolValue};
use inbox_codec::{encode_prove_input, CodecError, ProveInput};

use crate::inbox::{IInbox, VerifierProof};
use crate::producer::BatchProofs;

/// A ready to sign `prove` transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofTx {
    pub to: Address,
    pub input: Bytes,
    /// `None` lets the node estimate gas.
    pub gas_limit: Option<u64>,
}

/// Builds `prove(bytes _data, bytes _proof)` calls for the inbox.
#[derive(Debug, Clone)]
pub struct ProofTxBuilder {
    inbox: Address,
    gas_limit: Option<u64>,
}

impl ProofTxBuilder {
    pub fn new(inbox: Address, gas_limit: Option<u64>) -> Self {
        Self { inbox, gas_limit }
    }

    /// Packs the proven proposals into the inbox's prove input.
    pub fn prove_input(batch: &BatchProofs) -> ProveInput {
        let mut input = ProveInput {
            proposals: Vec::with_capacity(batch.proof_responses.len()),
            transitions: Vec::with_capacity(batch.proof_responses.len()),
            metadata: Vec::with_capacity(batch.proof_responses.len()),
        };
        for response in &batch.proof_responses {
            input.proposals.push(response.meta.proposal.clone());
            input.transitions.push(response.opts.transition());
            input.metadata.push(response.opts.metadata());
        }
        input
    }

    /// The aggregated proof first, then every sub-proof.
    pub fn verifier_proofs(batch: &BatchProofs) -> Vec<VerifierProof> {
        std::iter::once(VerifierProof {
            verifier: batch.verifier,
            proof: Bytes::from(batch.aggregated_proof.clone()),
        })
        .chain(batch.sub_proofs.iter().map(|sub| VerifierProof {
            verifier: sub.verifier,
            proof: Bytes::from(sub.proof.clone()),
        }))
        .collect()
    }

    pub fn build(&self, batch: &BatchProofs) -> Result<ProofTx, CodecError> {
        let data = encode_prove_input(&Self::prove_input(batch))?;
        let proof = Self::verifier_proofs(batch).abi_encode();
        let input = IInbox::proveCall {
            _data: Bytes::from(data),
            _proof: Bytes::from(proof),
        }
        .abi_encode();

        Ok(ProofTx {
            to: self.inbox,
            input: Bytes::from(input),
            gas_limit: self.gas_limit,
        })
    }
}
