//! Submission pool
//!
//! Intake pushes jobs onto an unbounded queue so it never waits. A supervisor
//! task pulls from the queue, keeps at most `max_concurrency` workers in
//! flight, logs every outcome and turns worker panics into `failed` records.
//! Dropping every `SubmissionQueue` handle lets the supervisor drain in-flight
//! work and exit.
//!
//! A job's slot claim comes back to the supervisor with its result and is only
//! released once the outcome is persisted. Records the store could not finish
//! keep their slot until the process exits.

use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::models::record::{
    FailureCode, FailureReason, OperationRecord, OperationStatus, SubmissionOutcome,
};
use crate::services::record_store::{RecordStore, StoreError};
use crate::services::slot_guard::{SlotClaim, SlotGuard};
use crate::services::submission::SubmissionWorker;

/// One record to drive to a terminal status
#[derive(Debug)]
pub struct SubmissionJob {
    pub record: OperationRecord,
    /// Released by the supervisor once the outcome is persisted
    pub claim: Option<SlotClaim>,
}

/// Producer side of the pool
#[derive(Clone)]
pub struct SubmissionQueue {
    tx: mpsc::UnboundedSender<SubmissionJob>,
}

impl SubmissionQueue {
    /// Never blocks. Hands the job back if the pool is no longer running.
    pub fn enqueue(&self, job: SubmissionJob) -> Result<(), SubmissionJob> {
        self.tx.send(job).map_err(|e| e.0)
    }
}

struct JobResult {
    id: String,
    claim: Option<SlotClaim>,
    result: Result<Result<SubmissionOutcome, StoreError>, Box<dyn Any + Send>>,
}

/// Start the supervisor task
///
/// # Arguments
///
/// * `worker` - Shared submission worker
/// * `max_concurrency` - Upper bound on jobs in flight (at least 1)
pub fn start_submission_pool(
    worker: Arc<SubmissionWorker>,
    max_concurrency: usize,
) -> (SubmissionQueue, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let max_concurrency = max_concurrency.max(1);

    info!(max_concurrency = max_concurrency, "Submission pool started");
    let handle = tokio::spawn(supervise(worker, rx, max_concurrency));

    (SubmissionQueue { tx }, handle)
}

async fn supervise(
    worker: Arc<SubmissionWorker>,
    mut rx: mpsc::UnboundedReceiver<SubmissionJob>,
    max_concurrency: usize,
) {
    let mut in_flight: JoinSet<JobResult> = JoinSet::new();
    let mut stranded: Vec<SlotClaim> = Vec::new();
    let mut accepting = true;

    loop {
        tokio::select! {
            job = rx.recv(), if accepting && in_flight.len() < max_concurrency => match job {
                Some(job) => spawn_job(&mut in_flight, &worker, job),
                None => {
                    info!(in_flight = in_flight.len(), "Submission queue closed, draining");
                    accepting = false;
                }
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Some(claim) = handle_finished(&worker, joined).await {
                    stranded.push(claim);
                }
            }
            else => break,
        }
    }

    info!(stranded = stranded.len(), "Submission pool stopped");
}

fn spawn_job(in_flight: &mut JoinSet<JobResult>, worker: &Arc<SubmissionWorker>, job: SubmissionJob) {
    let worker = Arc::clone(worker);

    in_flight.spawn(async move {
        let SubmissionJob { record, claim } = job;
        let result = AssertUnwindSafe(worker.process(&record)).catch_unwind().await;
        JobResult {
            id: record.id,
            claim,
            result,
        }
    });
}

/// Log a finished job and persist panics as failures
///
/// Returns the slot claim when the record could not be brought to a terminal
/// status; the caller keeps it so no second submission takes the slot.
async fn handle_finished(worker: &SubmissionWorker, joined: Result<JobResult, JoinError>) -> Option<SlotClaim> {
    let JobResult { id, claim, result } = match joined {
        Ok(finished) => finished,
        Err(e) => {
            // Task aborted: its claim was dropped with it
            error!(error = %e, "Submission task did not finish");
            return None;
        }
    };

    match result {
        Ok(Ok(SubmissionOutcome::Completed(receipt))) => {
            info!(
                op_hash = %id,
                tx_hash = %receipt.transaction_hash,
                gas_used = receipt.gas_used,
                "Operation completed"
            );
            None
        }
        Ok(Ok(SubmissionOutcome::Failed(reason))) => {
            warn!(
                op_hash = %id,
                code = %reason.code,
                reason = %reason.message,
                "Operation failed"
            );
            None
        }
        Ok(Err(e)) if e.is_already_terminal() => {
            error!(op_hash = %id, error = %e, "Operation finished outside its worker");
            None
        }
        Ok(Err(e)) => {
            // Left unfinished; recovery retries it on next start
            error!(op_hash = %id, error = %e, "Submission could not persist its outcome, slot stays held");
            claim
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(op_hash = %id, panic = %message, "Submission worker panicked");

            let reason = FailureReason::new(FailureCode::WorkerPanicked, message);
            match worker.record_failure(&id, reason).await {
                Ok(()) => None,
                Err(e) if e.is_already_terminal() => None,
                Err(e) => {
                    error!(op_hash = %id, error = %e, "Failed to mark panicked operation as failed");
                    claim
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Re-enqueue every `pending` or `submitted` record left by a previous run
///
/// `submitted` records claim their slot first since their transaction may
/// already be on the way. A record whose slot is already held is marked
/// `failed/slot_conflict` instead of being sent a second time.
///
/// Returns the number of records handed to the pool.
pub async fn recover_unfinished(
    store: &dyn RecordStore,
    slots: &SlotGuard,
    queue: &SubmissionQueue,
) -> Result<usize, StoreError> {
    let (mut unfinished, pending): (Vec<_>, Vec<_>) = store
        .list_unfinished()
        .await?
        .into_iter()
        .partition(|record| record.status == OperationStatus::Submitted);
    unfinished.extend(pending);

    let mut recovered = 0;

    for record in unfinished {
        let Some(claim) = slots.try_claim(record.operation.sender, record.operation.nonce) else {
            warn!(
                op_hash = %record.id,
                sender = %record.operation.sender,
                nonce = %record.operation.nonce,
                "Another unfinished operation holds this nonce slot"
            );
            let reason = FailureReason::new(
                FailureCode::SlotConflict,
                format!(
                    "nonce {} of sender {} was already being submitted",
                    record.operation.nonce, record.operation.sender
                ),
            );
            store
                .update_status(&record.id, &SubmissionOutcome::Failed(reason))
                .await?;
            continue;
        };

        info!(op_hash = %record.id, status = %record.status, "Recovering unfinished operation");
        let job = SubmissionJob {
            record,
            claim: Some(claim),
        };
        if queue.enqueue(job).is_err() {
            warn!("Submission pool is not running, stopping recovery");
            break;
        }
        recovered += 1;
    }

    Ok(recovered)
}
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_reads_str_and_string_payloads() {
        let literal: Box<dyn Any + Send> = Box::new("gateway exploded");
        assert_eq!(panic_message(literal.as_ref()), "gateway exploded");

        let formatted: Box<dyn Any + Send> = Box::new(format!("nonce {}", 7));
        assert_eq!(panic_message(formatted.as_ref()), "nonce 7");

        let opaque: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(opaque.as_ref()), "worker panicked");
    }
}
