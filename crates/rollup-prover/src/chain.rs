//! Read access to the settlement layer (L1) and the rollup (L2).

use std::time::Duration;

use alloy::eips::BlockId;
use alloy::primitives::{Address, Bytes, B256, U64};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use async_trait::async_trait;
use inbox_codec::Checkpoint;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::inbox::IInbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxEventKind {
    Proposed,
    Proved,
}

/// An inbox log with its packed payload still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInboxEvent {
    pub kind: InboxEventKind,
    pub data: Bytes,
    pub block_number: u64,
    pub block_hash: B256,
}

#[async_trait]
pub trait L1Client: Send + Sync {
    /// Hash of the canonical block at `number`, if it exists.
    async fn block_hash(&self, number: u64) -> Result<Option<B256>>;

    async fn block_number(&self) -> Result<u64>;

    /// Inbox events emitted in blocks `from..=to`, in log order.
    async fn inbox_events(&self, inbox: Address, from: u64, to: u64) -> Result<Vec<RawInboxEvent>>;
}

#[async_trait]
pub trait L2Client: Send + Sync {
    /// The last L2 block of `proposal_id`, once the rollup node has derived it.
    async fn checkpoint(&self, proposal_id: u64) -> Result<Option<Checkpoint>>;
}

fn connect(rpc_url: &str) -> Result<DynProvider> {
    let url: Url = rpc_url.parse().with_context(|| format!("invalid rpc url {rpc_url}"))?;
    Ok(ProviderBuilder::new().connect_http(url).erased())
}

pub struct RpcL1Client {
    provider: DynProvider,
}

impl RpcL1Client {
    pub fn new(rpc_url: &str) -> Result<Self> {
        Ok(Self {
            provider: connect(rpc_url)?,
        })
    }
}

#[async_trait]
impl L1Client for RpcL1Client {
    async fn block_hash(&self, number: u64) -> Result<Option<B256>> {
        let block = self.provider.get_block(BlockId::number(number)).await?;
        Ok(block.map(|b| b.header.hash))
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn inbox_events(&self, inbox: Address, from: u64, to: u64) -> Result<Vec<RawInboxEvent>> {
        let filter = Filter::new()
            .address(inbox)
            .event_signature(vec![IInbox::Proposed::SIGNATURE_HASH, IInbox::Proved::SIGNATURE_HASH])
            .from_block(from)
            .to_block(to);
        let logs = self.provider.get_logs(&filter).await?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let (Some(block_number), Some(block_hash)) = (log.block_number, log.block_hash) else {
                debug!("skipping pending inbox log");
                continue;
            };
            let event = match log.topic0() {
                Some(topic) if *topic == IInbox::Proposed::SIGNATURE_HASH => {
                    let decoded = IInbox::Proposed::decode_log_data(log.data())?;
                    RawInboxEvent {
                        kind: InboxEventKind::Proposed,
                        data: decoded.data,
                        block_number,
                        block_hash,
                    }
                }
                Some(topic) if *topic == IInbox::Proved::SIGNATURE_HASH => {
                    let decoded = IInbox::Proved::decode_log_data(log.data())?;
                    RawInboxEvent {
                        kind: InboxEventKind::Proved,
                        data: decoded.data,
                        block_number,
                        block_hash,
                    }
                }
                _ => continue,
            };
            events.push(event);
        }
        Ok(events)
    }
}

pub struct RpcL2Client {
    provider: DynProvider,
}

impl RpcL2Client {
    pub fn new(rpc_url: &str) -> Result<Self> {
        Ok(Self {
            provider: connect(rpc_url)?,
        })
    }
}

#[async_trait]
impl L2Client for RpcL2Client {
    async fn checkpoint(&self, proposal_id: u64) -> Result<Option<Checkpoint>> {
        let last_block: Option<U64> = self
            .provider
            .raw_request("taiko_lastBlockIDByBatchID".into(), (U64::from(proposal_id),))
            .await
            .context("failed to query last block of proposal")?;
        let Some(number) = last_block else {
            return Ok(None);
        };

        let Some(block) = self.provider.get_block(BlockId::number(number.to::<u64>())).await? else {
            return Ok(None);
        };
        Ok(Some(Checkpoint {
            block_number: block.header.number,
            block_hash: block.header.hash,
            state_root: block.header.state_root,
        }))
    }
}

/// Polls `l2` until the checkpoint of `proposal_id` is available. Returns
/// `None` when cancelled.
pub async fn wait_checkpoint(
    l2: &dyn L2Client,
    proposal_id: u64,
    poll_interval: Duration,
    token: &CancellationToken,
) -> Option<Checkpoint> {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            _ = ticker.tick() => {}
        }
        match l2.checkpoint(proposal_id).await {
            Ok(Some(checkpoint)) => return Some(checkpoint),
            Ok(None) => debug!("checkpoint of proposal {proposal_id} not derived yet"),
            Err(e) => warn!("failed to fetch checkpoint of proposal {proposal_id}: {e:#}"),
        }
    }
}
