use std::time::Instant;

use async_trait::async_trait;
use tracing::info;

use super::raiko::{BatchEntry, RaikoOutput};
use super::{
    BatchProofs, ProducerError, ProofProducer, ProofRequestOptions, ProofResponse, ProofType, ProposalMeta,
    RaikoClient, Verifiers,
};

/// Zero-knowledge proofs from the batch backend. With `zk_any` the backend
/// picks the zkVM, or declines the proposal with "not drawn".
#[derive(Debug, Clone)]
pub struct ZkvmProducer {
    client: RaikoClient,
    proof_type: ProofType,
    verifiers: Verifiers,
}

impl ZkvmProducer {
    pub fn new(client: RaikoClient, proof_type: ProofType, verifiers: Verifiers) -> Result<Self, ProducerError> {
        if !matches!(proof_type, ProofType::ZkAny | ProofType::Risc0 | ProofType::Sp1) {
            return Err(ProducerError::UnknownProofType(format!("{proof_type} is not a zk proof type")));
        }
        Ok(Self {
            client,
            proof_type,
            verifiers,
        })
    }

    /// Concrete proof system of a finished proof.
    fn resolve_type(&self, output: &RaikoOutput) -> Result<ProofType, ProducerError> {
        let resolved = match output.proof_type.as_deref() {
            Some(reported) => reported.parse()?,
            None => self.proof_type,
        };
        if resolved == ProofType::ZkAny {
            return Err(ProducerError::Backend("backend did not report which zkVM produced the proof".into()));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl ProofProducer for ZkvmProducer {
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

        let proof_type = self.resolve_type(&output)?;
        info!("{proof_type} proof for proposal {id} generated in {:?}", request_at.elapsed());
        Ok(ProofResponse::new(id, meta, opts, output.proof, proof_type))
    }

    async fn aggregate(&self, items: &[ProofResponse], request_at: Instant) -> Result<BatchProofs, ProducerError> {
        let Some(first) = items.first() else {
            return Err(ProducerError::EmptyBatch);
        };
        let proof_type = first.proof_type;
        if let Some(other) = items.iter().find(|item| item.proof_type != proof_type) {
            return Err(ProducerError::Backend(format!(
                "cannot aggregate {} proof {} with {proof_type} proofs",
                other.proof_type, other.id
            )));
        }
        let verifier = self.verifiers.resolve(proof_type)?;
        let batches: Vec<BatchEntry> = items
            .iter()
            .map(|item| BatchEntry {
                batch_id: item.id,
                l1_inclusion_block_number: item.meta.l1_block_number,
            })
            .collect();

        let output = self
            .client
            .request_batch(proof_type.as_str(), first.opts.prover_address, &batches, true)
            .await?;

        info!("aggregated {} {proof_type} proofs in {:?}", items.len(), request_at.elapsed());
        Ok(BatchProofs::new(items, output.proof, proof_type, verifier))
    }

    async fn request_cancel(&self, opts: &ProofRequestOptions) -> Result<(), ProducerError> {
        self.client
            .cancel(self.proof_type.as_str(), opts.prover_address, &[BatchEntry::from(opts)])
            .await
    }

    fn proof_type(&self) -> ProofType {
        self.proof_type
    }

    fn proof_types(&self) -> Vec<ProofType> {
        match self.proof_type {
            ProofType::ZkAny => vec![ProofType::Risc0, ProofType::Sp1],
            other => vec![other],
        }
    }
}
