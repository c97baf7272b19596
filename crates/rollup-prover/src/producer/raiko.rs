//! HTTP client for the batch proving backend.

use alloy_primitives::Address;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ProducerError, ProofRequestOptions};
use crate::config::RaikoConfig;

const BATCH_PATH: &str = "/v3/proof/batch";
const CANCEL_PATH: &str = "/v3/proof/batch/cancel";

const STATUS_REGISTERED: &str = "registered";
const STATUS_IN_PROGRESS: &str = "work_in_progress";
const STATUS_NOT_DRAWN: &str = "zk_any_not_drawn";

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    batches: Vec<BatchEntry>,
    prover: String,
    aggregate: bool,
    proof_type: &'a str,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct BatchEntry {
    pub batch_id: u64,
    pub l1_inclusion_block_number: u64,
}

impl From<&ProofRequestOptions> for BatchEntry {
    fn from(opts: &ProofRequestOptions) -> Self {
        Self {
            batch_id: opts.proposal_id,
            l1_inclusion_block_number: opts.l1_inclusion_block_number,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RaikoResponse {
    #[serde(default)]
    data: Option<RaikoData>,
    #[serde(default)]
    proof_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RaikoData {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    proof: Option<RaikoProof>,
}

#[derive(Debug, Default, Deserialize)]
struct RaikoProof {
    #[serde(default)]
    proof: Option<String>,
}

/// A finished proof as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaikoOutput {
    pub proof: Vec<u8>,
    /// The proof system the backend actually used, if it said so.
    pub proof_type: Option<String>,
}

/// Maps a backend reply onto a proof or one of the producer conditions.
pub fn parse_response(status: StatusCode, body: &[u8]) -> Result<RaikoOutput, ProducerError> {
    if status != StatusCode::OK {
        return Err(ProducerError::Backend(format!(
            "unexpected status {status}: {}",
            String::from_utf8_lossy(body)
        )));
    }

    let response: RaikoResponse = serde_json::from_slice(body)
        .map_err(|e| ProducerError::Backend(format!("malformed response: {e}")))?;

    let error = response.error.unwrap_or_default();
    let message = response.message.unwrap_or_default();
    if !error.is_empty() || !message.is_empty() {
        return Err(ProducerError::Backend(format!("{error}: {message}")));
    }

    let data = response.data.unwrap_or_default();
    match data.status.as_deref() {
        Some(STATUS_REGISTERED) => return Err(ProducerError::Retry),
        Some(STATUS_IN_PROGRESS) => return Err(ProducerError::InProgress),
        Some(STATUS_NOT_DRAWN) => return Err(ProducerError::NotDrawn),
        _ => {}
    }

    let proof = data
        .proof
        .and_then(|p| p.proof)
        .filter(|p| !p.trim_start_matches("0x").is_empty())
        .ok_or(ProducerError::EmptyProof)?;

    Ok(RaikoOutput {
        proof: hex::decode(proof.trim_start_matches("0x"))?,
        proof_type: response.proof_type.filter(|t| !t.is_empty()),
    })
}

#[derive(Debug, Clone)]
pub struct RaikoClient {
    http: reqwest::Client,
    endpoint: String,
    jwt: Option<String>,
}

impl RaikoClient {
    pub fn new(config: &RaikoConfig) -> Result<Self, ProducerError> {
        let http = reqwest::Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            jwt: config.jwt.clone().filter(|jwt| !jwt.is_empty()),
        })
    }

    /// Requests proofs for `batches`, or their aggregation when `aggregate` is set.
    pub async fn request_batch(
        &self,
        proof_type: &str,
        prover: Address,
        batches: &[BatchEntry],
        aggregate: bool,
    ) -> Result<RaikoOutput, ProducerError> {
        let (status, body) = self.post(BATCH_PATH, proof_type, prover, batches, aggregate).await?;
        parse_response(status, &body)
    }

    pub async fn cancel(&self, proof_type: &str, prover: Address, batches: &[BatchEntry]) -> Result<(), ProducerError> {
        let (status, body) = self.post(CANCEL_PATH, proof_type, prover, batches, false).await?;
        if status != StatusCode::OK {
            return Err(ProducerError::Backend(format!(
                "cancel failed with status {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }
        Ok(())
    }

    async fn post(
        &self,
        path: &str,
        proof_type: &str,
        prover: Address,
        batches: &[BatchEntry],
        aggregate: bool,
    ) -> Result<(StatusCode, Vec<u8>), ProducerError> {
        let body = BatchRequest {
            batches: batches.to_vec(),
            prover: prover_hex(prover),
            aggregate,
            proof_type,
        };
        let url = format!("{}{path}", self.endpoint);
        debug!("posting {proof_type} request for {} batches to {url}", batches.len());

        let mut request = self.http.post(&url).json(&body);
        if let Some(jwt) = &self.jwt {
            request = request.header(reqwest::header::AUTHORIZATION, format!("Bearer {}", STANDARD.encode(jwt)));
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        Ok((status, bytes.to_vec()))
    }
}

/// Checksummed address without the `0x` prefix.
fn prover_hex(prover: Address) -> String {
    prover.to_checksum(None).trim_start_matches("0x").to_string()
}
