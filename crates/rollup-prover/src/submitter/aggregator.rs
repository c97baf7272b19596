use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ProofSubmitter, SubmitterError};
use crate::producer::{ProducerError, ProofType};
use crate::retry::{retry_with_backoff, ConstantBackoff, RetryError};

impl ProofSubmitter {
    /// Aggregates everything buffered for `proof_type` and hands the batch to
    /// the event loop for submission.
    ///
    /// The buffer is read, not drained; proofs leave it once the batch is
    /// submitted or rejected. Pending backend answers are retried at the
    /// polling interval until cancelled. Any other error ends this round and
    /// leaves the buffer for the next trigger.
    pub async fn aggregate_proofs_by_type(
        &self,
        proof_type: ProofType,
        token: &CancellationToken,
    ) -> Result<(), SubmitterError> {
        let lane = self.lanes.get(proof_type)?.clone();
        let items = lane.read_all();
        if items.is_empty() {
            debug!("{proof_type} buffer drained before aggregation");
            lane.reset_aggregating();
            return Ok(());
        }

        let started = Instant::now();
        let backoff = ConstantBackoff::unbounded(self.settings.proof_polling_interval);
        let name = format!("aggregate {} {proof_type} proofs", items.len());
        let result = retry_with_backoff(&name, &backoff, token, ProducerError::is_pending, || {
            self.producer.aggregate(&items, started)
        })
        .await;

        let batch = match result {
            Ok(batch) => batch,
            Err(e) => {
                lane.reset_aggregating();
                return Err(match e {
                    RetryError::Cancelled(_) => SubmitterError::Cancelled,
                    RetryError::Failed(e) => e.into(),
                });
            }
        };

        self.metrics.record_aggregated(batch.ids.len(), started.elapsed());
        info!(
            "aggregated {} {proof_type} proofs {:?} in {:?}",
            batch.ids.len(),
            batch.ids,
            started.elapsed()
        );

        if self.channels.batch_tx.send(batch).await.is_err() {
            lane.reset_aggregating();
            return Err(SubmitterError::ChannelClosed("batch proof"));
        }
        Ok(())
    }
}
