//! Requests single proofs, routes them into their lanes and submits
//! aggregated batches to the inbox.

use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy_primitives::{Address, B256};
use inbox_codec::CodecError;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::{try_aggregate, Admission, BufferError, ProofLane, ProofLanes};
use crate::chain::{wait_checkpoint, L1Client, L2Client};
use crate::metrics::ProverMetrics;
use crate::producer::{
    BatchProofs, ProducerError, ProofProducer, ProofRequest, ProofRequestOptions, ProofResponse, ProofType,
};
use crate::state::ProverState;

pub mod aggregator;
pub mod builder;
pub mod sender;
pub mod validator;

pub use builder::{ProofTx, ProofTxBuilder};
pub use sender::{AlloyTxSender, RetryingSender, SendError, TxSender};
pub use validator::{validate_proof, Validity};

/// L1 blocks scanned again below a reorged proposal.
pub const REORG_RESCAN_DEPTH: u64 = 64;

#[derive(Debug, Error)]
pub enum SubmitterError {
    #[error("proof for proposal {id} still in progress after {elapsed:?}")]
    Timeout { id: u64, elapsed: Duration },
    #[error("invalid proofs for proposals {ids:?}")]
    InvalidProof { ids: Vec<u64> },
    #[error("failed to submit proofs for proposals {ids:?}: {source}")]
    SubmissionFailed {
        ids: Vec<u64>,
        #[source]
        source: SendError,
    },
    #[error(transparent)]
    Producer(#[from] ProducerError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("chain query failed: {0:#}")]
    Chain(anyhow::Error),
    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
    #[error("cancelled")]
    Cancelled,
}

impl SubmitterError {
    /// Whether the handler that hit this error should run again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Chain(_) => true,
            Self::Producer(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Knobs of the submitter, taken from the config.
#[derive(Debug, Clone)]
pub struct SubmitterSettings {
    pub prover_address: Address,
    pub proof_polling_interval: Duration,
    pub proof_timeout: Duration,
    pub forced_interval: Duration,
}

/// Senders into the event loop.
#[derive(Debug, Clone)]
pub struct SubmitterChannels {
    pub request_tx: mpsc::Sender<ProofRequest>,
    pub aggregate_tx: mpsc::Sender<ProofType>,
    pub batch_tx: mpsc::Sender<BatchProofs>,
    pub flush_tx: mpsc::Sender<ProofType>,
}

/// External collaborators of the submitter.
#[derive(Clone)]
pub struct SubmitterDeps {
    pub producer: Arc<dyn ProofProducer>,
    pub l1: Arc<dyn L1Client>,
    pub l2: Arc<dyn L2Client>,
    pub sender: Arc<dyn TxSender>,
}

pub struct ProofSubmitter {
    producer: Arc<dyn ProofProducer>,
    lanes: Arc<ProofLanes>,
    state: Arc<ProverState>,
    l1: Arc<dyn L1Client>,
    l2: Arc<dyn L2Client>,
    sender: Arc<dyn TxSender>,
    builder: ProofTxBuilder,
    metrics: Arc<ProverMetrics>,
    settings: SubmitterSettings,
    channels: SubmitterChannels,
}

impl ProofSubmitter {
    pub fn new(
        deps: SubmitterDeps,
        lanes: Arc<ProofLanes>,
        state: Arc<ProverState>,
        builder: ProofTxBuilder,
        metrics: Arc<ProverMetrics>,
        settings: SubmitterSettings,
        channels: SubmitterChannels,
    ) -> Self {
        Self {
            producer: deps.producer,
            lanes,
            state,
            l1: deps.l1,
            l2: deps.l2,
            sender: deps.sender,
            builder,
            metrics,
            settings,
            channels,
        }
    }

    pub fn lanes(&self) -> &Arc<ProofLanes> {
        &self.lanes
    }

    pub fn metrics(&self) -> &Arc<ProverMetrics> {
        &self.metrics
    }

    async fn pause(&self, token: &CancellationToken) -> Result<(), SubmitterError> {
        tokio::select! {
            _ = token.cancelled() => Err(SubmitterError::Cancelled),
            _ = sleep(self.settings.proof_polling_interval) => Ok(()),
        }
    }

    /// Proves one proposal and admits the proof into its lane.
    ///
    /// The backend is polled until the proof is ready. A proof still in
    /// progress after the proof timeout is cancelled at the backend and the
    /// request fails with [`SubmitterError::Timeout`].
    pub async fn request_proof(&self, req: &ProofRequest, token: &CancellationToken) -> Result<(), SubmitterError> {
        let id = req.id();
        if self.state.is_finalized(id) {
            debug!("proposal {id} already finalized, skipping proof request");
            return Ok(());
        }

        let checkpoint = wait_checkpoint(self.l2.as_ref(), id, self.settings.proof_polling_interval, token)
            .await
            .ok_or(SubmitterError::Cancelled)?;
        let Some(parent) = self.wait_parent(id, token).await? else {
            debug!("proposal {id} finalized while waiting for its parent");
            return Ok(());
        };
        let opts = ProofRequestOptions::new(&req.meta, self.settings.prover_address, parent, checkpoint);
        self.state.set_local_transition(id, &opts.transition());

        let started = Instant::now();
        let response = loop {
            match self.producer.request_proof(&opts, id, &req.meta, started).await {
                Ok(response) => break response,
                Err(ProducerError::NotDrawn) => {
                    info!("proposal {id} was not drawn for a zk proof");
                    self.lanes.mark_resolved_except(id, None);
                    self.flush_all();
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    let elapsed = started.elapsed();
                    if elapsed >= self.settings.proof_timeout {
                        warn!("proof for proposal {id} timed out after {elapsed:?}, cancelling");
                        if let Err(e) = self.producer.request_cancel(&opts).await {
                            warn!("failed to cancel proof request for proposal {id}: {e}");
                        }
                        self.metrics.record_cancelled();
                        return Err(SubmitterError::Timeout { id, elapsed });
                    }
                    debug!("proof for proposal {id} not ready: {e}");
                    self.pause(token).await?;
                }
                Err(e) => return Err(e.into()),
            }
        };
        self.metrics.record_generated(started.elapsed());
        info!(
            "{} proof for proposal {id} generated in {:?}",
            response.proof_type,
            started.elapsed()
        );

        self.admit(response, token).await
    }

    /// Polls until the transition `id` builds on is known. Proofs are
    /// requested concurrently, so the parent may still be in flight. Returns
    /// `None` if `id` is finalized meanwhile.
    async fn wait_parent(&self, id: u64, token: &CancellationToken) -> Result<Option<B256>, SubmitterError> {
        let mut ticker = interval(self.settings.proof_polling_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(SubmitterError::Cancelled),
                _ = ticker.tick() => {}
            }
            if self.state.is_finalized(id) {
                return Ok(None);
            }
            if let Some(parent) = self.state.parent_transition_hash(id) {
                return Ok(Some(parent));
            }
            debug!("parent transition of proposal {id} not known yet");
        }
    }

    /// Routes a finished proof into its lane, waiting while the lane is full.
    async fn admit(&self, response: ProofResponse, token: &CancellationToken) -> Result<(), SubmitterError> {
        let id = response.id;
        let proof_type = response.proof_type;
        let lane = self.lanes.get(proof_type)?.clone();

        loop {
            match self.lanes.handle_proof_response(response.clone()) {
                Ok(Admission::Buffered) => {
                    debug!("{proof_type} proof {id} buffered");
                    try_aggregate(&lane, self.settings.forced_interval, &self.channels.aggregate_tx);
                    if self.channels.flush_tx.try_send(proof_type).is_err() {
                        debug!("cache flush for {proof_type} already pending");
                    }
                    return Ok(());
                }
                Ok(Admission::Cached) => {
                    debug!("{proof_type} proof {id} cached until the frontier reaches it");
                    return Ok(());
                }
                Ok(Admission::Duplicate) => return Ok(()),
                Err(BufferError::Overflow { max }) => {
                    debug!("{proof_type} buffer full ({max}), waiting to admit proof {id}");
                    try_aggregate(&lane, self.settings.forced_interval, &self.channels.aggregate_tx);
                    self.pause(token).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Moves contiguous cached proofs of `proof_type` into its buffer.
    pub fn flush_cache(&self, proof_type: ProofType) -> Result<(), SubmitterError> {
        self.refill(self.lanes.get(proof_type)?);
        Ok(())
    }

    /// Flushes every lane and checks its aggregation triggers.
    pub fn flush_all(&self) {
        for lane in self.lanes.iter() {
            self.refill(lane);
        }
    }

    /// Pulls cached proofs that became contiguous into the buffer. Needed
    /// whenever the buffer drains or the frontier moves.
    fn refill(&self, lane: &ProofLane) {
        lane.flush_cache();
        try_aggregate(lane, self.settings.forced_interval, &self.channels.aggregate_tx);
    }

    /// Checks every buffered proof of `batch` and submits it in one transaction.
    ///
    /// Invalid proofs are dropped from the lane and the batch is rejected with
    /// [`SubmitterError::InvalidProof`]; the remaining proofs are aggregated
    /// again on the next trigger. If sending fails the batch is cleared and
    /// every proposal in it is requested again.
    pub async fn batch_submit_proofs(
        &self,
        batch: BatchProofs,
        token: &CancellationToken,
    ) -> Result<(), SubmitterError> {
        let lane = self.lanes.get(batch_lane(&batch))?.clone();
        if batch.proof_responses.is_empty() {
            lane.reset_aggregating();
            return Err(ProducerError::EmptyBatch.into());
        }

        let mut invalid = Vec::new();
        let mut reorged = Vec::new();
        for item in &batch.proof_responses {
            let validity = match validate_proof(self.l1.as_ref(), &self.state, item).await {
                Ok(validity) => validity,
                Err(e) => {
                    lane.reset_aggregating();
                    return Err(SubmitterError::Chain(e));
                }
            };
            match validity {
                Validity::Valid => {}
                Validity::Reorged { expected, actual } => {
                    warn!(
                        "L1 block {} of proposal {} reorged: expected {expected}, found {actual:?}",
                        item.meta.l1_block_number, item.id
                    );
                    invalid.push(item.id);
                    reorged.push(item);
                }
                Validity::AlreadyFinalized { last_finalized } => {
                    info!("proposal {} already finalized (last finalized {last_finalized})", item.id);
                    invalid.push(item.id);
                }
            }
        }

        if !invalid.is_empty() {
            lane.clear_items(&invalid);
            self.metrics.record_invalid(invalid.len());
            if !reorged.is_empty() {
                let ids: Vec<u64> = reorged.iter().map(|item| item.id).collect();
                self.lanes.reopen_all(&ids);
                if let Some(lowest) = ids.iter().min() {
                    self.state.rewind_last_handled(*lowest);
                }
                if let Some(block) = reorged.iter().map(|item| item.meta.l1_block_number).min() {
                    self.state.request_rescan(block.saturating_sub(REORG_RESCAN_DEPTH));
                }
            }
            self.refill(&lane);
            return Err(SubmitterError::InvalidProof { ids: invalid });
        }

        let tx = match self.builder.build(&batch) {
            Ok(tx) => tx,
            Err(e) => {
                lane.reset_aggregating();
                return Err(e.into());
            }
        };

        if token.is_cancelled() {
            lane.reset_aggregating();
            return Err(SubmitterError::Cancelled);
        }

        match self.sender.send(&tx).await {
            Ok(tx_hash) => {
                lane.clear_items(&batch.ids);
                self.refill(&lane);
                self.metrics.record_sent(batch.ids.len());
                if let Some(highest) = batch.highest_id() {
                    self.metrics.set_latest_submitted(highest);
                }
                info!(
                    "submitted {} {} proofs for proposals {:?} in {tx_hash}",
                    batch.ids.len(),
                    batch.proof_type,
                    batch.ids
                );
                Ok(())
            }
            Err(source) => {
                error!("failed to submit {} proofs {:?}: {source}", batch.proof_type, batch.ids);
                self.metrics.record_submission_error();
                self.abandon_batch(&lane, &batch).await?;
                Err(SubmitterError::SubmissionFailed { ids: batch.ids, source })
            }
        }
    }

    /// Drops a batch that could not be sent and requests its proposals again.
    async fn abandon_batch(&self, lane: &ProofLane, batch: &BatchProofs) -> Result<(), SubmitterError> {
        lane.clear_items(&batch.ids);
        self.lanes.reopen_all(&batch.ids);
        self.refill(lane);
        for item in &batch.proof_responses {
            debug!("requeueing proof request for proposal {}", item.id);
            self.channels
                .request_tx
                .send(ProofRequest::new(item.meta.clone()))
                .await
                .map_err(|_| SubmitterError::ChannelClosed("proof request"))?;
        }
        Ok(())
    }
}

/// The lane a batch was read from.
fn batch_lane(batch: &BatchProofs) -> ProofType {
    batch
        .proof_responses
        .first()
        .map(|item| item.proof_type)
        .unwrap_or(batch.proof_type)
}
