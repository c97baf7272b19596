use std::sync::Arc;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::B256;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use super::builder::ProofTx;
use crate::retry::{retry_with_backoff, ConstantBackoff, RetryError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("transaction {0} reverted")]
    Reverted(B256),
    #[error("transaction {hash} was broadcast but not confirmed: {reason}")]
    Unconfirmed { hash: B256, reason: String },
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("send cancelled")]
    Cancelled,
}

impl SendError {
    /// Only failures before broadcast are retried, so a transaction is never
    /// paid for twice.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }
}

#[async_trait]
pub trait TxSender: Send + Sync {
    /// Signs, sends and waits for the receipt of `tx`.
    async fn send(&self, tx: &ProofTx) -> Result<B256, SendError>;
}

/// Sends transactions through a wallet-filled alloy provider.
pub struct AlloyTxSender {
    provider: DynProvider,
}

impl AlloyTxSender {
    pub fn new(rpc_url: &str, private_key: &str) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .trim_start_matches("0x")
            .parse()
            .context("Failed to parse private key")?;
        let wallet = EthereumWallet::from(signer);
        let url: Url = rpc_url.parse().with_context(|| format!("invalid rpc url {rpc_url}"))?;
        let provider = ProviderBuilder::new().wallet(wallet).connect_http(url).erased();
        Ok(Self { provider })
    }
}

#[async_trait]
impl TxSender for AlloyTxSender {
    async fn send(&self, tx: &ProofTx) -> Result<B256, SendError> {
        let mut request = TransactionRequest::default()
            .with_to(tx.to)
            .with_input(tx.input.clone());
        if let Some(gas_limit) = tx.gas_limit {
            request = request.with_gas_limit(gas_limit);
        }

        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(|e| SendError::Rpc(e.to_string()))?;
        let tx_hash = *pending.tx_hash();
        info!("sent proof transaction {tx_hash}");

        let receipt = pending.get_receipt().await.map_err(|e| SendError::Unconfirmed {
            hash: tx_hash,
            reason: e.to_string(),
        })?;
        if !receipt.status() {
            return Err(SendError::Reverted(tx_hash));
        }
        Ok(tx_hash)
    }
}

/// Retries RPC failures of an inner sender with a constant backoff.
pub struct RetryingSender {
    inner: Arc<dyn TxSender>,
    backoff: ConstantBackoff,
    token: CancellationToken,
}

impl RetryingSender {
    pub fn new(inner: Arc<dyn TxSender>, backoff: ConstantBackoff, token: CancellationToken) -> Self {
        Self { inner, backoff, token }
    }
}

#[async_trait]
impl TxSender for RetryingSender {
    async fn send(&self, tx: &ProofTx) -> Result<B256, SendError> {
        let result = retry_with_backoff(
            "send proof transaction",
            &self.backoff,
            &self.token,
            SendError::is_retryable,
            || self.inner.send(tx),
        )
        .await;
        match result {
            Ok(hash) => Ok(hash),
            Err(RetryError::Cancelled(_)) => Err(SendError::Cancelled),
            Err(RetryError::Failed(e)) => Err(e),
        }
    }
}
