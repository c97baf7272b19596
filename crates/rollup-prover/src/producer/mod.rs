//! Proof producers turn a proposal into a proof, and a run of proofs into one
//! aggregated batch proof.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::config::{ProducerKind, ProducerSpec, RaikoConfig};

pub mod composite;
pub mod dummy;
pub mod error;
pub mod optimistic;
pub mod raiko;
pub mod sgx;
pub mod types;
pub mod zkvm;

pub use composite::CompositeProducer;
pub use dummy::DummyProducer;
pub use error::ProducerError;
pub use optimistic::OptimisticProducer;
pub use raiko::RaikoClient;
pub use sgx::SgxProducer;
pub use types::*;
pub use zkvm::ZkvmProducer;

#[async_trait]
pub trait ProofProducer: Send + Sync {
    /// Requests a proof for a single proposal. `request_at` is when the
    /// caller first asked, so repeated polls report total latency.
    async fn request_proof(
        &self,
        opts: &ProofRequestOptions,
        id: u64,
        meta: &ProposalMeta,
        request_at: Instant,
    ) -> Result<ProofResponse, ProducerError>;

    /// Aggregates proofs of a single proof type into one batch proof.
    async fn aggregate(&self, items: &[ProofResponse], request_at: Instant) -> Result<BatchProofs, ProducerError>;

    /// Asks the backend to drop an outstanding request.
    async fn request_cancel(&self, opts: &ProofRequestOptions) -> Result<(), ProducerError>;

    /// The proof type this producer is configured for.
    fn proof_type(&self) -> ProofType;

    /// Every proof type a response from this producer may carry. One buffer
    /// lane exists per entry.
    fn proof_types(&self) -> Vec<ProofType> {
        vec![self.proof_type()]
    }
}

/// Builds producer trees from their configuration.
pub struct ProducerFactory {
    raiko: RaikoConfig,
    verifiers: Verifiers,
}

impl ProducerFactory {
    pub fn new(raiko: RaikoConfig, verifiers: Verifiers) -> Self {
        Self { raiko, verifiers }
    }

    pub fn create(&self, spec: &ProducerSpec) -> Result<Arc<dyn ProofProducer>, ProducerError> {
        let producer: Arc<dyn ProofProducer> = match spec.kind {
            ProducerKind::Dummy => Arc::new(DummyProducer::new(spec.proof_type, self.verifiers.clone())),
            ProducerKind::Optimistic => Arc::new(OptimisticProducer::new(self.verifiers.clone())),
            ProducerKind::Sgx => Arc::new(SgxProducer::new(
                RaikoClient::new(&self.raiko)?,
                spec.proof_type,
                self.verifiers.clone(),
            )?),
            ProducerKind::Zk => Arc::new(ZkvmProducer::new(
                RaikoClient::new(&self.raiko)?,
                spec.proof_type,
                self.verifiers.clone(),
            )?),
            ProducerKind::Composite => {
                if spec.children.is_empty() {
                    return Err(ProducerError::Backend("composite producer needs at least one child".into()));
                }
                let children = spec
                    .children
                    .iter()
                    .map(|child| self.create(child))
                    .collect::<Result<Vec<_>, _>>()?;
                Arc::new(CompositeProducer::new(
                    spec.proof_type,
                    spec.fan_in,
                    children,
                    self.verifiers.clone(),
                ))
            }
        };
        Ok(producer)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use alloy_primitives::Address;

    use super::*;
    use crate::config::FanIn;

    fn verifiers() -> Verifiers {
        Verifiers::new(BTreeMap::from([
            (ProofType::Sgx, Address::repeat_byte(1)),
            (ProofType::Risc0, Address::repeat_byte(2)),
        ]))
    }

    #[test]
    fn test_factory_builds_nested_composite() {
        let spec = ProducerSpec {
            kind: ProducerKind::Composite,
            proof_type: ProofType::Pivot,
            fan_in: FanIn::FirstSuccess,
            children: vec![
                ProducerSpec {
                    kind: ProducerKind::Sgx,
                    proof_type: ProofType::Sgx,
                    ..Default::default()
                },
                ProducerSpec {
                    kind: ProducerKind::Zk,
                    proof_type: ProofType::ZkAny,
                    ..Default::default()
                },
            ],
        };

        let producer = ProducerFactory::new(RaikoConfig::default(), verifiers())
            .create(&spec)
            .unwrap();
        assert_eq!(producer.proof_type(), ProofType::Pivot);
        assert_eq!(
            producer.proof_types(),
            vec![ProofType::Sgx, ProofType::Risc0, ProofType::Sp1]
        );
    }

    #[test]
    fn test_factory_rejects_empty_composite() {
        let spec = ProducerSpec {
            kind: ProducerKind::Composite,
            ..Default::default()
        };
        assert!(ProducerFactory::new(RaikoConfig::default(), verifiers())
            .create(&spec)
            .is_err());
    }

    #[test]
    fn test_factory_rejects_mismatched_zk_type() {
        let spec = ProducerSpec {
            kind: ProducerKind::Zk,
            proof_type: ProofType::Sgx,
            ..Default::default()
        };
        assert!(matches!(
            ProducerFactory::new(RaikoConfig::default(), verifiers()).create(&spec),
            Err(ProducerError::UnknownProofType(_))
        ));
    }
}
