//! Submission worker
//!
//! Drives one operation record to a terminal status:
//! encode → fetch relayer sequence → sign → mark submitted → broadcast → await
//! inclusion. Every failure ends as `failed` with a reason; nothing is surfaced
//! to the submitting client.

use alloy::primitives::{Address, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::operation::UserOperation;
use crate::models::record::{
    FailureCode, FailureReason, OperationRecord, OperationStatus, SubmissionOutcome,
};
use crate::services::chain_gateway::{
    ChainGateway, GatewayError, TransactionHandle, UnsignedTransaction,
};
use crate::services::operation_encoder::OperationEncoder;
use crate::services::record_store::{RecordStore, StoreError};
use crate::services::relay_signer::RelaySigner;

#[derive(Debug, Clone)]
pub struct SubmissionSettings {
    /// EntryPoint contract every relay transaction is sent to
    pub entry_point: Address,
    /// Gas limit of the outer relay transaction
    pub gas_limit: u64,
    /// Budget for inclusion after broadcast; exceeded means `failed`
    pub inclusion_timeout: Duration,
}

pub struct SubmissionWorker {
    store: Arc<dyn RecordStore>,
    gateway: Arc<dyn ChainGateway>,
    signer: Arc<dyn RelaySigner>,
    encoder: Arc<dyn OperationEncoder>,
    settings: SubmissionSettings,
    /// Serializes sequence fetch, signing and broadcast across workers. Holds the
    /// last relayer sequence number the node accepted.
    dispatch: Mutex<Option<u64>>,
}

impl SubmissionWorker {
    pub fn new(
        store: Arc<dyn RecordStore>,
        gateway: Arc<dyn ChainGateway>,
        signer: Arc<dyn RelaySigner>,
        encoder: Arc<dyn OperationEncoder>,
        settings: SubmissionSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            signer,
            encoder,
            settings,
            dispatch: Mutex::new(None),
        }
    }

    /// Run `record` to completion and persist the outcome
    ///
    /// `pending` records go through the full pipeline. `submitted` records (left
    /// over from a previous run) only wait for inclusion of their known
    /// transaction.
    ///
    /// # Errors
    ///
    /// Only store failures are returned. The record then stays unfinished and is
    /// picked up again by startup recovery.
    pub async fn process(&self, record: &OperationRecord) -> Result<SubmissionOutcome, StoreError> {
        let outcome = match (record.status, record.tx_hash) {
            (OperationStatus::Pending, _) => self.submit(record).await?,
            (OperationStatus::Submitted, Some(hash)) => {
                info!(op_hash = %record.id, tx_hash = %hash, "Resuming inclusion wait");
                self.confirm(&record.id, TransactionHandle { hash }, None).await
            }
            (OperationStatus::Submitted, None) => SubmissionOutcome::Failed(FailureReason::new(
                FailureCode::Abandoned,
                "submitted without a transaction hash",
            )),
            (status, _) => {
                return Err(StoreError::InvalidTransition {
                    id: record.id.clone(),
                    status,
                    target: OperationStatus::Submitted,
                });
            }
        };

        self.store.update_status(&record.id, &outcome).await?;
        Ok(outcome)
    }

    /// Terminal `failed` write for a job that never produced an outcome
    pub async fn record_failure(&self, id: &str, reason: FailureReason) -> Result<(), StoreError> {
        self.store
            .update_status(id, &SubmissionOutcome::Failed(reason))
            .await
    }

    async fn submit(&self, record: &OperationRecord) -> Result<SubmissionOutcome, StoreError> {
        let op = &record.operation;

        let input = match self.encoder.encode(op) {
            Ok(input) => input,
            Err(e) => return Ok(failed(FailureCode::Encoding, e.to_string())),
        };

        let (max_fee_per_gas, max_priority_fee_per_gas) = match fee_fields(op) {
            Ok(fees) => fees,
            Err(reason) => return Ok(SubmissionOutcome::Failed(reason)),
        };

        let (handle, nonce) = {
            let mut last_sequence = self.dispatch.lock().await;

            let fetched = match self.gateway.sequence_number(self.signer.address()).await {
                Ok(n) => n,
                Err(e) => return Ok(gateway_failure(e)),
            };

            // The node may not count our own unmined broadcasts yet
            let nonce = match *last_sequence {
                Some(last) if last >= fetched => last + 1,
                _ => fetched,
            };

            let unsigned = UnsignedTransaction {
                to: self.settings.entry_point,
                input,
                nonce,
                gas_limit: self.settings.gas_limit,
                max_fee_per_gas,
                max_priority_fee_per_gas,
            };

            let signed = match self.signer.sign(unsigned).await {
                Ok(signed) => signed,
                Err(e) => return Ok(failed(FailureCode::Signing, e.to_string())),
            };

            self.store.mark_submitted(&record.id, signed.hash).await?;

            match self.gateway.broadcast(signed).await {
                Ok(handle) => {
                    *last_sequence = Some(nonce);
                    info!(
                        op_hash = %record.id,
                        tx_hash = %handle.hash,
                        relayer_nonce = nonce,
                        "Relay transaction sent, waiting for inclusion"
                    );
                    (handle, nonce)
                }
                Err(e) => return Ok(gateway_failure(e)),
            }
        };

        Ok(self.confirm(&record.id, handle, Some(nonce)).await)
    }

    /// Wait for inclusion of `handle`. `nonce` is the relayer sequence it was
    /// sent with, when this process sent it.
    async fn confirm(&self, id: &str, handle: TransactionHandle, nonce: Option<u64>) -> SubmissionOutcome {
        let timeout = self.settings.inclusion_timeout;

        let outcome = match tokio::time::timeout(timeout, self.gateway.await_inclusion(&handle)).await {
            Ok(Ok(receipt)) if receipt.success => {
                debug!(op_hash = %id, tx_hash = %handle.hash, "Inclusion confirmed");
                SubmissionOutcome::Completed(receipt)
            }
            Ok(Ok(receipt)) => failed(
                FailureCode::Reverted,
                format!("transaction {} reverted", receipt.transaction_hash),
            ),
            Ok(Err(e)) => gateway_failure(e),
            Err(_) => {
                warn!(
                    op_hash = %id,
                    tx_hash = %handle.hash,
                    timeout_secs = timeout.as_secs(),
                    "Inclusion wait timed out"
                );
                failed(
                    FailureCode::InclusionTimeout,
                    format!("no inclusion of {} within {}s", handle.hash, timeout.as_secs()),
                )
            }
        };

        if let (Some(nonce), SubmissionOutcome::Failed(reason)) = (nonce, &outcome) {
            if sequence_may_be_unused(reason.code) {
                self.rewind_sequence(id, nonce).await;
            }
        }

        outcome
    }

    /// The transaction sent at `nonce` may never land, so the next dispatch must
    /// not build on top of it. The node's pending count still bounds it from below.
    async fn rewind_sequence(&self, id: &str, nonce: u64) {
        let mut last_sequence = self.dispatch.lock().await;
        let rewound = rewound_sequence(*last_sequence, nonce);

        if rewound != *last_sequence {
            info!(
                op_hash = %id,
                relayer_nonce = nonce,
                "Relay transaction not included, relayer sequence rewound"
            );
            *last_sequence = rewound;
        }
    }
}

/// Last accepted sequence once the transaction at `nonce` is given up on
fn rewound_sequence(last: Option<u64>, nonce: u64) -> Option<u64> {
    match (last, nonce.checked_sub(1)) {
        (Some(last), Some(before)) => Some(last.min(before)),
        _ => None,
    }
}

/// Failures after broadcast that leave the relayer nonce possibly unconsumed.
/// A revert was mined, so its nonce is spent.
fn sequence_may_be_unused(code: FailureCode) -> bool {
    matches!(
        code,
        FailureCode::InclusionTimeout | FailureCode::InclusionFailed | FailureCode::GatewayUnavailable
    )
}

fn failed(code: FailureCode, message: impl Into<String>) -> SubmissionOutcome {
    SubmissionOutcome::Failed(FailureReason::new(code, message))
}

fn gateway_failure(err: GatewayError) -> SubmissionOutcome {
    let code = match &err {
        GatewayError::Unavailable(_) => FailureCode::GatewayUnavailable,
        GatewayError::Broadcast(_) => FailureCode::BroadcastRejected,
        GatewayError::Inclusion(_) => FailureCode::InclusionFailed,
        GatewayError::Reverted(_) => FailureCode::Reverted,
    };
    failed(code, err.to_string())
}

/// Fee fields are copied from the operation and must fit the relay transaction
fn fee_fields(op: &UserOperation) -> Result<(u128, u128), FailureReason> {
    let narrow = |name: &str, value: U256| {
        u128::try_from(value).map_err(|_| {
            FailureReason::new(FailureCode::Encoding, format!("{} does not fit in 128 bits", name))
        })
    };

    Ok((
        narrow("maxFeePerGas", op.max_fee_per_gas)?,
        narrow("maxPriorityFeePerGas", op.max_priority_fee_per_gas)?,
    ))
}
