//! The event loop tying the watcher, the handlers and the submitter together.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use anyhow::Result;
use inbox_codec::ProposedEventPayload;
use tokio::sync::{mpsc, Notify};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferMonitor, ProofLanes};
use crate::config::Config;
use crate::metrics::ProverMetrics;
use crate::producer::{BatchProofs, ProofRequest, ProofType};
use crate::retry::{retry_with_backoff, ConstantBackoff, RetryError};
use crate::state::ProverState;
use crate::submitter::{
    ProofSubmitter, ProofTxBuilder, SubmitterChannels, SubmitterDeps, SubmitterError, SubmitterSettings,
};

pub mod events;
pub mod handlers;
pub mod watcher;

pub use events::ChainEvent;
pub use handlers::{EventHandler, HandlerSettings};
pub use watcher::InboxWatcher;

/// Runs `operation` on its own task with a bounded constant backoff and logs
/// the final error, if any.
pub fn spawn_with_retry<F, Fut, E, P>(
    name: String,
    backoff: ConstantBackoff,
    token: CancellationToken,
    is_retryable: P,
    operation: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
    P: Fn(&E) -> bool + Send + 'static,
{
    tokio::spawn(async move {
        match retry_with_backoff(&name, &backoff, &token, is_retryable, operation).await {
            Ok(()) => {}
            Err(RetryError::Cancelled(_)) => debug!("{name} cancelled"),
            Err(RetryError::Failed(e)) => error!("{name} failed: {e}"),
        }
    });
}

struct Receivers {
    events: mpsc::Receiver<ChainEvent>,
    requests: mpsc::Receiver<ProofRequest>,
    aggregate: mpsc::Receiver<ProofType>,
    batches: mpsc::Receiver<BatchProofs>,
    flush: mpsc::Receiver<ProofType>,
}

/// Owns every channel of the prover and dispatches their messages.
pub struct Prover {
    submitter: Arc<ProofSubmitter>,
    handler: Arc<EventHandler>,
    lanes: Arc<ProofLanes>,
    state: Arc<ProverState>,
    deps: SubmitterDeps,
    inbox: Address,
    backoff: ConstantBackoff,
    forced_interval: Duration,
    monitor_tick: Duration,
    force_tick: Duration,
    wake: Arc<Notify>,
    events_tx: mpsc::Sender<ChainEvent>,
    aggregate_tx: mpsc::Sender<ProofType>,
    receivers: Receivers,
}

impl Prover {
    pub fn new(config: &Config, deps: SubmitterDeps) -> Self {
        let capacity = config.event_loop.channel_capacity;
        let (events_tx, events) = mpsc::channel(capacity);
        let (request_tx, requests) = mpsc::channel(capacity);
        let (aggregate_tx, aggregate) = mpsc::channel(capacity);
        let (batch_tx, batches) = mpsc::channel(capacity);
        let (flush_tx, flush) = mpsc::channel(capacity);

        let proof_types = deps.producer.proof_types();
        info!("proving with {} producer, lanes {proof_types:?}", deps.producer.proof_type());
        let lanes = Arc::new(ProofLanes::new(
            &proof_types,
            config.buffer.max_length,
            config.start_proposal_id,
        ));
        let state = Arc::new(ProverState::new());
        let metrics = Arc::new(ProverMetrics::default());

        let submitter = Arc::new(ProofSubmitter::new(
            deps.clone(),
            lanes.clone(),
            state.clone(),
            ProofTxBuilder::new(config.inbox_address, config.submitter.gas_limit()),
            metrics,
            SubmitterSettings {
                prover_address: config.prover_address,
                proof_polling_interval: config.submitter.proof_polling_interval(),
                proof_timeout: config.submitter.proof_timeout(),
                forced_interval: config.buffer.forced_interval(),
            },
            SubmitterChannels {
                request_tx: request_tx.clone(),
                aggregate_tx: aggregate_tx.clone(),
                batch_tx,
                flush_tx,
            },
        ));
        let handler = Arc::new(EventHandler::new(
            state.clone(),
            lanes.clone(),
            deps.l1.clone(),
            request_tx,
            events_tx.clone(),
            HandlerSettings {
                prover_address: config.prover_address,
                proving_window: Duration::from_secs(config.proving_window_secs),
                prove_unassigned: config.prove_unassigned,
                start_proposal_id: config.start_proposal_id,
            },
        ));

        Self {
            submitter,
            handler,
            lanes,
            state,
            deps,
            inbox: config.inbox_address,
            backoff: ConstantBackoff::new(
                config.submitter.backoff_interval(),
                config.submitter.backoff_max_retries,
            ),
            forced_interval: config.buffer.forced_interval(),
            monitor_tick: config.buffer.monitor_tick(),
            force_tick: config.event_loop.force_tick(),
            wake: Arc::new(Notify::new()),
            events_tx,
            aggregate_tx,
            receivers: Receivers {
                events,
                requests,
                aggregate,
                batches,
                flush,
            },
        }
    }

    /// A watcher feeding this prover's event channel.
    pub fn watcher(&self, config: &Config) -> InboxWatcher {
        InboxWatcher::new(
            self.deps.l1.clone(),
            self.inbox,
            self.state.clone(),
            self.events_tx.clone(),
            self.wake.clone(),
            &config.event_loop,
        )
    }

    pub fn submitter(&self) -> &Arc<ProofSubmitter> {
        &self.submitter
    }

    pub fn state(&self) -> &Arc<ProverState> {
        &self.state
    }

    pub fn lanes(&self) -> &Arc<ProofLanes> {
        &self.lanes
    }

    /// Sender for injecting chain events, used when no watcher runs.
    pub fn events_sender(&self) -> mpsc::Sender<ChainEvent> {
        self.events_tx.clone()
    }

    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let Prover {
            submitter,
            handler,
            lanes,
            backoff,
            forced_interval,
            monitor_tick,
            force_tick,
            wake,
            aggregate_tx,
            mut receivers,
            ..
        } = self;

        for lane in lanes.iter() {
            BufferMonitor::new(lane.clone(), forced_interval, monitor_tick, aggregate_tx.clone()).spawn(token.clone());
        }

        // Unbounded so the loop never waits on the worker, which itself
        // waits on the request channel this loop drains.
        let (proposed_tx, proposed_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_proposals(handler.clone(), proposed_rx, backoff, token.clone()));

        let mut force_ticker = interval(force_tick);
        force_ticker.tick().await;
        info!("prover event loop started");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!("prover event loop stopped");
                    return Ok(());
                }
                Some(request) = receivers.requests.recv() => {
                    let submitter = submitter.clone();
                    let request = Arc::new(request);
                    let op_token = token.clone();
                    spawn_with_retry(
                        format!("proof request for proposal {}", request.id()),
                        backoff,
                        token.clone(),
                        SubmitterError::is_retryable,
                        move || {
                            let submitter = submitter.clone();
                            let request = request.clone();
                            let token = op_token.clone();
                            async move { submitter.request_proof(&request, &token).await }
                        },
                    );
                }
                Some(batch) = receivers.batches.recv() => {
                    // A failed batch is never resent as is. Its lane is
                    // released and the next trigger aggregates it afresh.
                    let submitter = submitter.clone();
                    let name = format!("{} batch submission of {:?}", batch.proof_type, batch.ids);
                    let token = token.clone();
                    tokio::spawn(async move {
                        if let Err(e) = submitter.batch_submit_proofs(batch, &token).await {
                            error!("{name} failed: {e}");
                        }
                    });
                }
                Some(proof_type) = receivers.aggregate.recv() => {
                    let submitter = submitter.clone();
                    let name = format!("{proof_type} aggregation");
                    let token = token.clone();
                    tokio::spawn(async move {
                        if let Err(e) = submitter.aggregate_proofs_by_type(proof_type, &token).await {
                            error!("{name} failed: {e}");
                        }
                    });
                }
                Some(proof_type) = receivers.flush.recv() => {
                    if let Err(e) = submitter.flush_cache(proof_type) {
                        warn!("failed to flush {proof_type} cache: {e}");
                    }
                }
                Some(event) = receivers.events.recv() => {
                    dispatch_event(&handler, &proposed_tx, event, backoff, &token);
                }
                _ = force_ticker.tick() => {
                    wake.notify_one();
                    submitter.flush_all();
                }
            }
        }
    }
}

fn dispatch_event(
    handler: &Arc<EventHandler>,
    proposed_tx: &mpsc::UnboundedSender<ProposedEvent>,
    event: ChainEvent,
    backoff: ConstantBackoff,
    token: &CancellationToken,
) {
    match event {
        ChainEvent::Proved { payload, .. } => handler.handle_proved(&payload),
        ChainEvent::Finalized {
            proposal_id,
            transition_hash,
        } => handler.handle_finalized(proposal_id, transition_hash),
        ChainEvent::Proposed {
            payload,
            l1_block_number,
            l1_block_hash,
        } => {
            let id = payload.proposal.id;
            if proposed_tx
                .send(ProposedEvent {
                    payload,
                    l1_block_number,
                    l1_block_hash,
                })
                .is_err()
            {
                warn!("proposal worker stopped, dropping proposal {id}");
            }
        }
        ChainEvent::AssignmentExpired { proposal_id } => {
            let handler = handler.clone();
            let op_token = token.clone();
            spawn_with_retry(
                format!("assignment expiry of proposal {proposal_id}"),
                backoff,
                token.clone(),
                |_: &anyhow::Error| true,
                move || {
                    let handler = handler.clone();
                    let token = op_token.clone();
                    async move { handler.handle_assignment_expired(proposal_id, &token).await }
                },
            );
        }
    }
}

struct ProposedEvent {
    payload: ProposedEventPayload,
    l1_block_number: u64,
    l1_block_hash: B256,
}

/// Handles proposals one at a time so ids are seen in log order.
async fn run_proposals(
    handler: Arc<EventHandler>,
    mut proposed_rx: mpsc::UnboundedReceiver<ProposedEvent>,
    backoff: ConstantBackoff,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            event = proposed_rx.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };
        let id = event.payload.proposal.id;
        let result = retry_with_backoff(
            &format!("proposed handler for proposal {id}"),
            &backoff,
            &token,
            |_: &anyhow::Error| true,
            || handler.handle_proposed(&event.payload, event.l1_block_number, event.l1_block_hash, &token),
        )
        .await;
        match result {
            Ok(()) => {}
            Err(RetryError::Cancelled(_)) => return,
            Err(RetryError::Failed(e)) => error!("failed to handle proposal {id}: {e:#}"),
        }
    }
}
