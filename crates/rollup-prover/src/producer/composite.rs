use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::try_join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info};

use super::{
    BatchProofs, ProducerError, ProofProducer, ProofRequestOptions, ProofResponse, ProofType, ProposalMeta, SubProof,
    Verifiers,
};
use crate::config::FanIn;

/// Fans a request out to several producers.
///
/// With [`FanIn::All`] every child must succeed and the response keeps each
/// child's proof in `parts`; aggregation then yields one sub-proof per extra
/// child. With [`FanIn::FirstSuccess`] the first child to finish wins and its
/// response is returned unchanged, so it lands in that child's lane.
pub struct CompositeProducer {
    proof_type: ProofType,
    fan_in: FanIn,
    children: Vec<Arc<dyn ProofProducer>>,
    verifiers: Verifiers,
}

impl CompositeProducer {
    pub fn new(
        proof_type: ProofType,
        fan_in: FanIn,
        children: Vec<Arc<dyn ProofProducer>>,
        verifiers: Verifiers,
    ) -> Self {
        Self {
            proof_type,
            fan_in,
            children,
            verifiers,
        }
    }

    async fn aggregate_all(&self, items: &[ProofResponse], request_at: Instant) -> Result<BatchProofs, ProducerError> {
        for item in items {
            if item.parts.len() != self.children.len() {
                return Err(ProducerError::Backend(format!(
                    "proof {} has {} parts, expected {}",
                    item.id,
                    item.parts.len(),
                    self.children.len()
                )));
            }
        }

        let batches = try_join_all(self.children.iter().enumerate().map(|(i, child)| {
            let parts: Vec<ProofResponse> = items.iter().map(|item| item.parts[i].clone()).collect();
            async move { child.aggregate(&parts, request_at).await }
        }))
        .await?;

        let verifier = self.verifiers.resolve(self.proof_type)?;
        let mut batches = batches.into_iter();
        let Some(primary) = batches.next() else {
            return Err(ProducerError::EmptyBatch);
        };

        let mut batch = BatchProofs::new(items, primary.aggregated_proof, self.proof_type, verifier);
        batch.sub_proofs = batches
            .map(|b| SubProof {
                proof_type: b.proof_type,
                verifier: b.verifier,
                proof: b.aggregated_proof,
            })
            .collect();
        Ok(batch)
    }

    fn child_for(&self, proof_type: ProofType) -> Result<&Arc<dyn ProofProducer>, ProducerError> {
        self.children
            .iter()
            .find(|child| child.proof_types().contains(&proof_type))
            .ok_or_else(|| ProducerError::UnknownProofType(proof_type.to_string()))
    }
}

/// Picks the error a first-success fan-out reports when no child produced a
/// proof. "Not drawn" only wins when every child said so, and a child that is
/// still working beats a hard failure.
fn first_success_error(errors: Vec<ProducerError>) -> ProducerError {
    if !errors.is_empty() && errors.iter().all(|e| matches!(e, ProducerError::NotDrawn)) {
        return ProducerError::NotDrawn;
    }
    let mut fatal = None;
    for e in errors {
        if e.is_retryable() {
            return e;
        }
        if fatal.is_none() && !matches!(e, ProducerError::NotDrawn) {
            fatal = Some(e);
        }
    }
    fatal.unwrap_or_else(|| ProducerError::Backend("no child producer configured".into()))
}

#[async_trait]
impl ProofProducer for CompositeProducer {
    async fn request_proof(
        &self,
        opts: &ProofRequestOptions,
        id: u64,
        meta: &ProposalMeta,
        request_at: Instant,
    ) -> Result<ProofResponse, ProducerError> {
        let requests = self
            .children
            .iter()
            .map(|child| child.request_proof(opts, id, meta, request_at));

        match self.fan_in {
            FanIn::All => {
                let parts = try_join_all(requests).await?;
                let primary = parts.first().map(|p| p.proof.clone()).unwrap_or_default();
                debug!("all {} child proofs ready for proposal {id}", parts.len());
                let mut response = ProofResponse::new(id, meta, opts, primary, self.proof_type);
                response.parts = parts;
                Ok(response)
            }
            FanIn::FirstSuccess => {
                let mut pending: FuturesUnordered<_> = requests.collect();
                let mut errors = Vec::with_capacity(self.children.len());
                while let Some(result) = pending.next().await {
                    match result {
                        Ok(response) => {
                            info!("proposal {id} proven first by {}", response.proof_type);
                            return Ok(response);
                        }
                        Err(e) => errors.push(e),
                    }
                }
                Err(first_success_error(errors))
            }
        }
    }

    async fn aggregate(&self, items: &[ProofResponse], request_at: Instant) -> Result<BatchProofs, ProducerError> {
        let Some(first) = items.first() else {
            return Err(ProducerError::EmptyBatch);
        };
        match self.fan_in {
            FanIn::All => self.aggregate_all(items, request_at).await,
            FanIn::FirstSuccess => self.child_for(first.proof_type)?.aggregate(items, request_at).await,
        }
    }

    async fn request_cancel(&self, opts: &ProofRequestOptions) -> Result<(), ProducerError> {
        try_join_all(self.children.iter().map(|child| child.request_cancel(opts))).await?;
        Ok(())
    }

    fn proof_type(&self) -> ProofType {
        self.proof_type
    }

    fn proof_types(&self) -> Vec<ProofType> {
        match self.fan_in {
            FanIn::All => vec![self.proof_type],
            FanIn::FirstSuccess => {
                let mut types = Vec::new();
                for t in self.children.iter().flat_map(|child| child.proof_types()) {
                    if !types.contains(&t) {
                        types.push(t);
                    }
                }
                types
            }
        }
    }
}
