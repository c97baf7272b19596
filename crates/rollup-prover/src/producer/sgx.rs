use std::time::Instant;

use async_trait::async_trait;
use tracing::info;

use super::raiko::BatchEntry;
use super::{
    BatchProofs, ProducerError, ProofProducer, ProofRequestOptions, ProofResponse, ProofType, ProposalMeta,
    RaikoClient, Verifiers,
};

/// Hardware attested proofs from the batch backend.
#[derive(Debug, Clone)]
pub struct SgxProducer {
    client: RaikoClient,
    proof_type: ProofType,
    verifiers: Verifiers,
}

impl SgxProducer {
    pub fn new(client: RaikoClient, proof_type: ProofType, verifiers: Verifiers) -> Result<Self, ProducerError> {
        if !matches!(proof_type, ProofType::Sgx | ProofType::Native | ProofType::Pivot) {
            return Err(ProducerError::UnknownProofType(format!("{proof_type} is not an attested proof type")));
        }
        Ok(Self {
            client,
            proof_type,
            verifiers,
        })
    }
}

#[async_trait]
impl ProofProducer for SgxProducer {
    async fn request_proof(
        &self,
        opts: &ProofRequestOptions,
        id: u64,
        meta: &ProposalMeta,
        request_at: Instant,
    ) -> Result<ProofResponse, ProducerError> {
        let batch = BatchEntry {
            batch_id: id,
            l1_inclusion_block_number: meta.l1_block_number,
        };
        let output = self
            .client
            .request_batch(self.proof_type.as_str(), opts.prover_address, &[batch], false)
            .await?;

        info!(
            "{} proof for proposal {id} generated in {:?}",
            self.proof_type,
            request_at.elapsed()
        );
        Ok(ProofResponse::new(id, meta, opts, output.proof, self.proof_type))
    }

    async fn aggregate(&self, items: &[ProofResponse], request_at: Instant) -> Result<BatchProofs, ProducerError> {
        let Some(first) = items.first() else {
            return Err(ProducerError::EmptyBatch);
        };
        let verifier = self.verifiers.resolve(self.proof_type)?;
        let batches: Vec<BatchEntry> = items
            .iter()
            .map(|item| BatchEntry {
                batch_id: item.id,
                l1_inclusion_block_number: item.meta.l1_block_number,
            })
            .collect();

        let output = self
            .client
            .request_batch(self.proof_type.as_str(), first.opts.prover_address, &batches, true)
            .await?;

        info!(
            "aggregated {} {} proofs in {:?}",
            items.len(),
            self.proof_type,
            request_at.elapsed()
        );
        Ok(BatchProofs::new(items, output.proof, self.proof_type, verifier))
    }

    async fn request_cancel(&self, opts: &ProofRequestOptions) -> Result<(), ProducerError> {
        self.client
            .cancel(self.proof_type.as_str(), opts.prover_address, &[BatchEntry::from(opts)])
            .await
    }

    fn proof_type(&self) -> ProofType {
        self.proof_type
    }
}
