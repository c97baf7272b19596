use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use super::{BatchProofs, ProducerError, ProofProducer, ProofRequestOptions, ProofResponse, ProofType, ProposalMeta, Verifiers};

/// Length of the placeholder proof.
pub const DUMMY_PROOF_LEN: usize = 100;

pub fn dummy_proof() -> Vec<u8> {
    vec![0xff; DUMMY_PROOF_LEN]
}

/// Answers every request immediately with a fixed placeholder proof.
#[derive(Debug, Clone)]
pub struct DummyProducer {
    proof_type: ProofType,
    verifiers: Verifiers,
}

impl DummyProducer {
    pub fn new(proof_type: ProofType, verifiers: Verifiers) -> Self {
        Self { proof_type, verifiers }
    }
}

#[async_trait]
impl ProofProducer for DummyProducer {
    async fn request_proof(
        &self,
        opts: &ProofRequestOptions,
        id: u64,
        meta: &ProposalMeta,
        _request_at: Instant,
    ) -> Result<ProofResponse, ProducerError> {
        debug!("returning {} placeholder proof for proposal {id}", self.proof_type);
        Ok(ProofResponse::new(id, meta, opts, dummy_proof(), self.proof_type))
    }

    async fn aggregate(&self, items: &[ProofResponse], _request_at: Instant) -> Result<BatchProofs, ProducerError> {
        if items.is_empty() {
            return Err(ProducerError::EmptyBatch);
        }
        let verifier = self.verifiers.resolve(self.proof_type)?;
        Ok(BatchProofs::new(items, dummy_proof(), self.proof_type, verifier))
    }

    async fn request_cancel(&self, _opts: &ProofRequestOptions) -> Result<(), ProducerError> {
        Ok(())
    }

    fn proof_type(&self) -> ProofType {
        self.proof_type
    }
}
