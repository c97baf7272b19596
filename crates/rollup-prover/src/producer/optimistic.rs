use std::time::Instant;

use async_trait::async_trait;

use super::{
    BatchProofs, DummyProducer, ProducerError, ProofProducer, ProofRequestOptions, ProofResponse, ProofType,
    ProposalMeta, Verifiers,
};

/// Submits transitions without a real proof. The inbox accepts them under the
/// `op` verifier, so they carry the lowest trust.
#[derive(Debug, Clone)]
pub struct OptimisticProducer {
    inner: DummyProducer,
}

impl OptimisticProducer {
    pub fn new(verifiers: Verifiers) -> Self {
        Self {
            inner: DummyProducer::new(ProofType::Op, verifiers),
        }
    }
}

#[async_trait]
impl ProofProducer for OptimisticProducer {
    async fn request_proof(
        &self,
        opts: &ProofRequestOptions,
        id: u64,
        meta: &ProposalMeta,
        request_at: Instant,
    ) -> Result<ProofResponse, ProducerError> {
        self.inner.request_proof(opts, id, meta, request_at).await
    }

    async fn aggregate(&self, items: &[ProofResponse], request_at: Instant) -> Result<BatchProofs, ProducerError> {
        self.inner.aggregate(items, request_at).await
    }

    async fn request_cancel(&self, _opts: &ProofRequestOptions) -> Result<(), ProducerError> {
        Ok(())
    }

    fn proof_type(&self) -> ProofType {
        ProofType::Op
    }
}
