use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use alloy_primitives::{Address, B256};
use anyhow::Result;
use async_trait::async_trait;
use inbox_codec::{Checkpoint, Proposal, ProposedEventPayload};
use rollup_prover::buffer::ProofLanes;
use rollup_prover::chain::{L1Client, L2Client, RawInboxEvent};
use rollup_prover::config::Config;
use rollup_prover::metrics::ProverMetrics;
use rollup_prover::producer::{
    BatchProofs, DummyProducer, ProducerError, ProofProducer, ProofRequest, ProofRequestOptions, ProofResponse,
    ProofType, ProposalMeta, Verifiers,
};
use rollup_prover::prover::{ChainEvent, Prover};
use rollup_prover::state::{OnchainRecord, ProverState};
use rollup_prover::submitter::{
    ProofSubmitter, ProofTx, ProofTxBuilder, SendError, SubmitterChannels, SubmitterDeps, SubmitterError,
    SubmitterSettings, TxSender,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const BLOCK_OFFSET: u64 = 100;

fn prover_address() -> Address {
    Address::repeat_byte(0xee)
}

fn inbox_address() -> Address {
    Address::repeat_byte(0x1b)
}

fn canonical_hash(number: u64) -> B256 {
    B256::with_last_byte(number as u8)
}

/// L1 whose block hashes can be swapped out to simulate a reorg.
#[derive(Default)]
struct MockL1 {
    reorged: Mutex<HashMap<u64, B256>>,
    /// Fails the n-th hash lookup of a block.
    fail_lookup: Mutex<Option<(u64, u32)>>,
    lookups: Mutex<HashMap<u64, u32>>,
}

impl MockL1 {
    fn reorg(&self, number: u64) {
        self.reorged.lock().unwrap().insert(number, B256::repeat_byte(0xdd));
    }

    fn fail_lookup(&self, number: u64, nth: u32) {
        *self.fail_lookup.lock().unwrap() = Some((number, nth));
    }
}

#[async_trait]
impl L1Client for MockL1 {
    async fn block_hash(&self, number: u64) -> Result<Option<B256>> {
        let lookup = {
            let mut lookups = self.lookups.lock().unwrap();
            let count = lookups.entry(number).or_default();
            *count += 1;
            *count
        };
        if *self.fail_lookup.lock().unwrap() == Some((number, lookup)) {
            anyhow::bail!("rpc timeout");
        }
        let reorged = self.reorged.lock().unwrap().get(&number).copied();
        Ok(Some(reorged.unwrap_or_else(|| canonical_hash(number))))
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(0)
    }

    async fn inbox_events(&self, _inbox: Address, _from: u64, _to: u64) -> Result<Vec<RawInboxEvent>> {
        Ok(Vec::new())
    }
}

struct MockL2;

#[async_trait]
impl L2Client for MockL2 {
    async fn checkpoint(&self, proposal_id: u64) -> Result<Option<Checkpoint>> {
        Ok(Some(Checkpoint {
            block_number: proposal_id * 10,
            block_hash: B256::repeat_byte(proposal_id as u8),
            state_root: B256::repeat_byte(0x5a),
        }))
    }
}

#[derive(Default)]
struct MockSender {
    failing: AtomicBool,
    sent: Mutex<Vec<ProofTx>>,
}

#[async_trait]
impl TxSender for MockSender {
    async fn send(&self, tx: &ProofTx) -> Result<B256, SendError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SendError::Rpc("connection refused".into()));
        }
        self.sent.lock().unwrap().push(tx.clone());
        Ok(B256::repeat_byte(0xaa))
    }
}

/// Answers "in progress" a set number of times before delegating to a dummy
/// producer, or declines every request as not drawn.
struct ScriptedProducer {
    inner: DummyProducer,
    pending_requests: AtomicU32,
    pending_aggregations: AtomicU32,
    not_drawn: bool,
    cancels: AtomicU32,
}

impl ScriptedProducer {
    fn new(pending_requests: u32, pending_aggregations: u32) -> Self {
        Self {
            inner: DummyProducer::new(
                ProofType::Sgx,
                Verifiers::new(BTreeMap::from([(ProofType::Sgx, Address::repeat_byte(0x0f))])),
            ),
            pending_requests: AtomicU32::new(pending_requests),
            pending_aggregations: AtomicU32::new(pending_aggregations),
            not_drawn: false,
            cancels: AtomicU32::new(0),
        }
    }
}

fn take_pending(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ProofProducer for ScriptedProducer {
    async fn request_proof(
        &self,
        opts: &ProofRequestOptions,
        id: u64,
        meta: &ProposalMeta,
        request_at: Instant,
    ) -> Result<ProofResponse, ProducerError> {
        if self.not_drawn {
            return Err(ProducerError::NotDrawn);
        }
        if take_pending(&self.pending_requests) {
            return Err(ProducerError::InProgress);
        }
        self.inner.request_proof(opts, id, meta, request_at).await
    }

    async fn aggregate(&self, items: &[ProofResponse], request_at: Instant) -> Result<BatchProofs, ProducerError> {
        if take_pending(&self.pending_aggregations) {
            return Err(ProducerError::Retry);
        }
        self.inner.aggregate(items, request_at).await
    }

    async fn request_cancel(&self, _opts: &ProofRequestOptions) -> Result<(), ProducerError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn proof_type(&self) -> ProofType {
        ProofType::Sgx
    }
}

fn producer() -> Arc<DummyProducer> {
    Arc::new(DummyProducer::new(
        ProofType::Sgx,
        Verifiers::new(BTreeMap::from([(ProofType::Sgx, Address::repeat_byte(0x0f))])),
    ))
}

fn meta(id: u64) -> ProposalMeta {
    ProposalMeta {
        proposal: Proposal {
            id,
            proposer: prover_address(),
            ..Default::default()
        },
        l1_block_number: BLOCK_OFFSET + id,
        l1_block_hash: canonical_hash(BLOCK_OFFSET + id),
    }
}

struct Harness {
    submitter: ProofSubmitter,
    state: Arc<ProverState>,
    l1: Arc<MockL1>,
    sender: Arc<MockSender>,
    token: CancellationToken,
    request_rx: mpsc::Receiver<ProofRequest>,
    aggregate_rx: mpsc::Receiver<ProofType>,
    batch_rx: mpsc::Receiver<BatchProofs>,
    flush_rx: mpsc::Receiver<ProofType>,
}

impl Harness {
    fn new() -> Self {
        Self::with_producer(producer())
    }

    fn with_producer(producer: Arc<dyn ProofProducer>) -> Self {
        let l1 = Arc::new(MockL1::default());
        let sender = Arc::new(MockSender::default());
        let state = Arc::new(ProverState::new());
        let (request_tx, request_rx) = mpsc::channel(16);
        let (aggregate_tx, aggregate_rx) = mpsc::channel(16);
        let (batch_tx, batch_rx) = mpsc::channel(16);
        let (flush_tx, flush_rx) = mpsc::channel(16);

        let submitter = ProofSubmitter::new(
            SubmitterDeps {
                producer,
                l1: l1.clone(),
                l2: Arc::new(MockL2),
                sender: sender.clone(),
            },
            Arc::new(ProofLanes::new(&[ProofType::Sgx], 2, 1)),
            state.clone(),
            ProofTxBuilder::new(inbox_address(), None),
            Arc::new(ProverMetrics::default()),
            SubmitterSettings {
                prover_address: prover_address(),
                proof_polling_interval: Duration::from_millis(10),
                proof_timeout: Duration::from_millis(200),
                forced_interval: Duration::ZERO,
            },
            SubmitterChannels {
                request_tx,
                aggregate_tx,
                batch_tx,
                flush_tx,
            },
        );

        Self {
            submitter,
            state,
            l1,
            sender,
            token: CancellationToken::new(),
            request_rx,
            aggregate_rx,
            batch_rx,
            flush_rx,
        }
    }

    async fn prove(&self, id: u64) {
        self.submitter
            .request_proof(&ProofRequest::new(meta(id)), &self.token)
            .await
            .unwrap();
    }

    /// Proves `ids` in order and returns the aggregated batch.
    async fn batch(&mut self, ids: &[u64]) -> BatchProofs {
        for id in ids {
            self.prove(*id).await;
        }
        assert_eq!(self.aggregate_rx.try_recv().unwrap(), ProofType::Sgx);
        self.submitter
            .aggregate_proofs_by_type(ProofType::Sgx, &self.token)
            .await
            .unwrap();
        self.batch_rx.try_recv().unwrap()
    }

    fn buffered(&self) -> Vec<u64> {
        self.submitter.lanes().get(ProofType::Sgx).unwrap().buffered_ids()
    }

    fn cached(&self) -> Vec<u64> {
        self.submitter.lanes().get(ProofType::Sgx).unwrap().cached_ids()
    }

    /// Parks a finished proof for `id` in the lane as if it came back early.
    fn admit_early(&self, id: u64) {
        let response = ProofResponse::new(id, &meta(id), &ProofRequestOptions::default(), vec![0xff], ProofType::Sgx);
        self.submitter.lanes().handle_proof_response(response).unwrap();
    }

    fn frontier(&self) -> u64 {
        self.submitter.lanes().get(ProofType::Sgx).unwrap().frontier()
    }
}

#[tokio::test]
async fn test_submit_full_batch() {
    let mut h = Harness::new();
    let batch = h.batch(&[1, 2]).await;
    assert_eq!(batch.ids, vec![1, 2]);

    h.submitter.batch_submit_proofs(batch, &h.token).await.unwrap();

    let sent = h.sender.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, inbox_address());
    assert!(h.buffered().is_empty());
    assert_eq!(h.frontier(), 3);

    let metrics = h.submitter.metrics().snapshot();
    assert_eq!(metrics.proofs_generated, 2);
    assert_eq!(metrics.proofs_aggregated, 2);
    assert_eq!(metrics.proofs_sent, 2);
    assert_eq!(metrics.latest_submitted_id, 2);
}

#[tokio::test]
async fn test_send_failure_requeues_batch() {
    let mut h = Harness::new();
    let batch = h.batch(&[1, 2]).await;
    h.sender.failing.store(true, Ordering::SeqCst);

    let err = h.submitter.batch_submit_proofs(batch, &h.token).await.unwrap_err();
    assert!(matches!(
        err,
        SubmitterError::SubmissionFailed { ref ids, source: SendError::Rpc(_) } if ids == &vec![1, 2]
    ));
    assert!(!err.is_retryable());
    assert!(h.buffered().is_empty());
    assert_eq!(h.frontier(), 1);
    assert_eq!(h.request_rx.try_recv().unwrap().id(), 1);
    assert_eq!(h.request_rx.try_recv().unwrap().id(), 2);
    assert_eq!(h.submitter.metrics().snapshot().submission_errors, 1);

    // the requeued requests go through once the node is reachable again
    h.sender.failing.store(false, Ordering::SeqCst);
    let batch = h.batch(&[1, 2]).await;
    h.submitter.batch_submit_proofs(batch, &h.token).await.unwrap();
    assert_eq!(h.submitter.metrics().latest_submitted(), 2);
    assert_eq!(h.sender.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_reorged_proof_is_dropped() {
    let mut h = Harness::new();
    let batch = h.batch(&[1, 2]).await;
    h.state.set_last_handled(2);
    h.l1.reorg(BLOCK_OFFSET + 1);

    let err = h.submitter.batch_submit_proofs(batch, &h.token).await.unwrap_err();
    assert!(matches!(err, SubmitterError::InvalidProof { ref ids } if ids == &vec![1]));
    assert_eq!(h.buffered(), vec![2]);
    assert_eq!(h.frontier(), 1);
    assert_eq!(h.state.last_handled_id(), 0);
    assert_eq!(h.state.take_rescan(), Some(BLOCK_OFFSET + 1 - 64));
    assert!(h.sender.sent.lock().unwrap().is_empty());
    assert_eq!(h.submitter.metrics().snapshot().invalid_proofs, 1);
}

#[tokio::test]
async fn test_finalized_proof_is_dropped() {
    let mut h = Harness::new();
    let batch = h.batch(&[1, 2]).await;
    h.state.set_last_finalized(1, B256::repeat_byte(0x01));

    let err = h.submitter.batch_submit_proofs(batch, &h.token).await.unwrap_err();
    assert!(matches!(err, SubmitterError::InvalidProof { ref ids } if ids == &vec![1]));
    assert_eq!(h.buffered(), vec![2]);
    assert_eq!(h.state.take_rescan(), None);

    // proposals at or below the finalized id are not proven again
    h.prove(1).await;
    assert_eq!(h.buffered(), vec![2]);
}

#[tokio::test]
async fn test_out_of_order_proof_waits_for_frontier() {
    let mut h = Harness::new();
    h.state.set_record(
        1,
        OnchainRecord {
            transition_hash: B256::repeat_byte(0x11),
            ..Default::default()
        },
    );

    h.prove(2).await;
    let lane = h.submitter.lanes().get(ProofType::Sgx).unwrap().clone();
    assert!(lane.buffered_ids().is_empty());
    assert_eq!(lane.cached_ids(), vec![2]);
    assert!(h.aggregate_rx.try_recv().is_err());

    h.prove(1).await;
    assert_eq!(lane.buffered_ids(), vec![1]);
    assert_eq!(h.flush_rx.try_recv().unwrap(), ProofType::Sgx);
    assert!(h.aggregate_rx.try_recv().is_err());

    h.submitter.flush_cache(ProofType::Sgx).unwrap();
    assert_eq!(lane.buffered_ids(), vec![1, 2]);
    assert!(lane.cached_ids().is_empty());
    assert_eq!(h.aggregate_rx.try_recv().unwrap(), ProofType::Sgx);
}

#[tokio::test]
async fn test_cache_is_flushed_after_submission() {
    let mut h = Harness::new();
    let batch = h.batch(&[1, 2]).await;
    h.admit_early(4);
    // 3 settles elsewhere, so the frontier lands on the cached 4
    h.submitter.lanes().mark_resolved_except(3, None);
    assert_eq!(h.frontier(), 4);
    assert_eq!(h.cached(), vec![4]);

    h.submitter.batch_submit_proofs(batch, &h.token).await.unwrap();
    assert_eq!(h.buffered(), vec![4]);
    assert!(h.cached().is_empty());
    assert_eq!(h.frontier(), 5);
}

#[tokio::test]
async fn test_request_waits_for_parent_transition() {
    let h = Harness::new();
    let (req1, req2) = (ProofRequest::new(meta(1)), ProofRequest::new(meta(2)));
    let (second, first) = tokio::join!(h.submitter.request_proof(&req2, &h.token), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.submitter.request_proof(&req1, &h.token).await
    });
    second.unwrap();
    first.unwrap();

    h.submitter.flush_cache(ProofType::Sgx).unwrap();
    assert_eq!(h.buffered(), vec![1, 2]);
    assert_eq!(h.submitter.metrics().snapshot().proofs_generated, 2);
}

#[tokio::test]
async fn test_request_times_out_and_cancels() {
    let producer = Arc::new(ScriptedProducer::new(u32::MAX, 0));
    let h = Harness::with_producer(producer.clone());

    let err = h
        .submitter
        .request_proof(&ProofRequest::new(meta(1)), &h.token)
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitterError::Timeout { id: 1, .. }));
    assert!(err.is_retryable());
    assert_eq!(producer.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(h.submitter.metrics().snapshot().requests_cancelled, 1);
    assert!(h.buffered().is_empty());
}

#[tokio::test]
async fn test_request_polls_until_proof_is_ready() {
    let producer = Arc::new(ScriptedProducer::new(3, 0));
    let h = Harness::with_producer(producer.clone());

    h.prove(1).await;
    assert_eq!(h.buffered(), vec![1]);
    assert_eq!(producer.cancels.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_not_drawn_proposal_is_skipped_in_every_lane() {
    let mut producer = ScriptedProducer::new(0, 0);
    producer.not_drawn = true;
    let h = Harness::with_producer(Arc::new(producer));
    h.admit_early(2);

    h.prove(1).await;
    assert_eq!(h.frontier(), 3);
    assert_eq!(h.buffered(), vec![2]);
    assert!(h.cached().is_empty());
    assert_eq!(h.submitter.metrics().snapshot().proofs_generated, 0);
}

#[tokio::test]
async fn test_aggregation_retries_while_backend_is_busy() {
    let producer = Arc::new(ScriptedProducer::new(0, 2));
    let mut h = Harness::with_producer(producer.clone());

    let batch = h.batch(&[1, 2]).await;
    assert_eq!(batch.ids, vec![1, 2]);
    assert_eq!(producer.pending_aggregations.load(Ordering::SeqCst), 0);
    assert_eq!(h.submitter.metrics().snapshot().proofs_aggregated, 2);
}

fn loop_config(max_length: usize, channel_capacity: usize) -> Config {
    let mut config = Config {
        inbox_address: inbox_address(),
        prover_address: prover_address(),
        ..Default::default()
    };
    config.buffer.max_length = max_length;
    config.buffer.forced_interval_secs = 0;
    config.submitter.proof_polling_interval_secs = 1;
    config.submitter.backoff_interval_secs = 1;
    config.event_loop.channel_capacity = channel_capacity;
    config.event_loop.force_tick_secs = 1;
    config
}

/// Runs the event loop over `proposals` own proposals until `expected` is the
/// latest submitted id, then keeps it running for `settle`. Returns whether
/// `expected` was reached in time.
async fn run_loop(
    config: Config,
    l1: Arc<MockL1>,
    sender: Arc<MockSender>,
    proposals: u64,
    expected: u64,
    settle: Duration,
) -> bool {
    let prover = Prover::new(
        &config,
        SubmitterDeps {
            producer: producer(),
            l1,
            l2: Arc::new(MockL2),
            sender,
        },
    );
    let submitter = prover.submitter().clone();
    let events_tx = prover.events_sender();
    let token = CancellationToken::new();
    let handle = tokio::spawn(prover.run(token.clone()));

    let feed = tokio::spawn(async move {
        for id in 1..=proposals {
            let meta = meta(id);
            let event = ChainEvent::Proposed {
                payload: ProposedEventPayload {
                    proposal: meta.proposal,
                    ..Default::default()
                },
                l1_block_number: meta.l1_block_number,
                l1_block_hash: meta.l1_block_hash,
            };
            if events_tx.send(event).await.is_err() {
                return;
            }
        }
    });

    let submitted = tokio::time::timeout(Duration::from_secs(30), async {
        while submitter.metrics().latest_submitted() < expected {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok();
    tokio::time::sleep(settle).await;

    token.cancel();
    feed.abort();
    handle.await.unwrap().unwrap();
    submitted
}

#[tokio::test]
async fn test_event_loop_proves_proposals() {
    let sender = Arc::new(MockSender::default());
    assert!(run_loop(loop_config(2, 16), Arc::new(MockL1::default()), sender.clone(), 2, 2, Duration::ZERO).await);
    assert_eq!(sender.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_event_loop_drains_backlog_with_small_channels() {
    let sender = Arc::new(MockSender::default());
    assert!(run_loop(loop_config(4, 2), Arc::new(MockL1::default()), sender.clone(), 12, 12, Duration::ZERO).await);
    assert_eq!(sender.sent.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_failed_validation_does_not_send_twice() {
    let l1 = Arc::new(MockL1::default());
    // the first lookup comes from the proposal handler, the second from validation
    l1.fail_lookup(BLOCK_OFFSET + 1, 2);
    let sender = Arc::new(MockSender::default());

    // the force ticker fires twice more while the loop settles
    assert!(run_loop(loop_config(2, 16), l1, sender.clone(), 2, 2, Duration::from_millis(2500)).await);
    assert_eq!(sender.sent.lock().unwrap().len(), 1);
}
