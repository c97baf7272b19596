use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::chain::{RpcL1Client, RpcL2Client};
use crate::commands::cli::VERSION;
use crate::config::Config;
use crate::producer::{ProducerFactory, Verifiers};
use crate::prover::Prover;
use crate::retry::ConstantBackoff;
use crate::submitter::{AlloyTxSender, RetryingSender, SubmitterDeps};

pub fn init() -> Result<()> {
    Config::init()
}

pub async fn start() -> Result<()> {
    let config = Config::load()?;
    let private_key = Config::private_key()?;
    let token = CancellationToken::new();

    let factory = ProducerFactory::new(config.raiko.clone(), Verifiers::new(config.verifiers.clone()));
    let producer = factory.create(&config.producer)?;

    let signer = AlloyTxSender::new(&config.rpc.l1_rpc, &private_key)?;
    let sender = RetryingSender::new(
        Arc::new(signer),
        ConstantBackoff::new(config.submitter.backoff_interval(), config.submitter.tx_max_retries),
        token.clone(),
    );
    let deps = SubmitterDeps {
        producer,
        l1: Arc::new(RpcL1Client::new(&config.rpc.l1_rpc)?),
        l2: Arc::new(RpcL2Client::new(&config.rpc.l2_rpc)?),
        sender: Arc::new(sender),
    };

    let prover = Prover::new(&config, deps);
    let watcher = prover.watcher(&config);

    info!("starting prover for inbox {}", config.inbox_address);
    let watcher_token = token.clone();
    let watcher_handle = tokio::spawn(async move {
        if let Err(e) = watcher.run(watcher_token).await {
            error!("inbox watcher failed: {e:?}");
        }
    });
    let prover_token = token.clone();
    let prover_handle = tokio::spawn(async move {
        if let Err(e) = prover.run(prover_token).await {
            error!("prover event loop failed: {e:?}");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    token.cancel();

    watcher_handle.await?;
    prover_handle.await?;
    Ok(())
}

pub fn version() {
    println!("version: {VERSION}");
}
