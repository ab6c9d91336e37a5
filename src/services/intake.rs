//! Intake service
//!
//! Validates an incoming operation, issues its op hash, persists the `pending`
//! record and hands it to the submission pool without waiting for the result.

use alloy::primitives::{Address, U256};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::jobs::submission_pool::{SubmissionJob, SubmissionQueue};
use crate::models::operation::{SubmitOperationRequest, UserOperation, ValidationError};
use crate::models::record::OperationRecord;
use crate::services::record_store::{RecordStore, StoreError};
use crate::services::slot_guard::SlotGuard;

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("nonce {nonce} of sender {sender} is already being submitted")]
    SlotInUse { sender: Address, nonce: U256 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct IntakeService {
    store: Arc<dyn RecordStore>,
    slots: SlotGuard,
    queue: SubmissionQueue,
}

impl IntakeService {
    pub fn new(store: Arc<dyn RecordStore>, slots: SlotGuard, queue: SubmissionQueue) -> Self {
        Self {
            store,
            slots,
            queue,
        }
    }

    /// Accept an operation and return its op hash
    ///
    /// Returns as soon as the `pending` record is persisted; submission happens
    /// in the background.
    ///
    /// # Errors
    ///
    /// * `Validation` - malformed operation, nothing persisted
    /// * `SlotInUse` - same sender and nonce already in flight, nothing persisted
    /// * `Store` - the record could not be written
    pub async fn submit(&self, request: SubmitOperationRequest) -> Result<String, IntakeError> {
        let operation = UserOperation::try_from(request)?;
        let (sender, nonce) = (operation.sender, operation.nonce);

        let claim = self
            .slots
            .try_claim(sender, nonce)
            .ok_or(IntakeError::SlotInUse { sender, nonce })?;

        let id = Uuid::new_v4().to_string();
        let record = OperationRecord::new_pending(id.clone(), operation, Utc::now().timestamp());
        self.store.insert(&record).await?;

        info!(op_hash = %id, sender = %sender, nonce = %nonce, "Operation accepted");

        let job = SubmissionJob {
            record,
            claim: Some(claim),
        };
        if let Err(job) = self.queue.enqueue(job) {
            warn!(
                op_hash = %job.record.id,
                "Submission pool is not running, operation stays pending until restart"
            );
        }

        Ok(id)
    }
}
