use thiserror::Error;

use super::types::ProofType;

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("proof generation in progress")]
    InProgress,
    #[error("proof request registered, retry")]
    Retry,
    #[error("zk proof not drawn for this proposal")]
    NotDrawn,
    #[error("backend returned an empty proof")]
    EmptyProof,
    #[error("no proofs to aggregate")]
    EmptyBatch,
    #[error("unknown proof type: {0}")]
    UnknownProofType(String),
    #[error("no verifier configured for proof type {0}")]
    MissingVerifier(ProofType),
    #[error("proof backend error: {0}")]
    Backend(String),
    #[error("proof backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid proof encoding: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl ProducerError {
    /// Errors that clear up by asking again later. Everything else is
    /// propagated to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InProgress | Self::Retry | Self::EmptyProof)
    }

    /// Errors the aggregator keeps retrying under its backoff.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::InProgress | Self::Retry)
    }
}
