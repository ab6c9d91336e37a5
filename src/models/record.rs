//! Operation record, status and receipt types
//!
//! Status progresses: pending → submitted → completed
//!                       ↘          ↘
//!                        failed     failed

use alloy::primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};

use crate::models::operation::UserOperation;

/// Lifecycle status of a relayed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Accepted and persisted, no relay transaction signed yet
    Pending,
    /// Relay transaction signed and about to be (or already) broadcast
    Submitted,
    /// Included on-chain, receipt stored
    Completed,
    /// Gave up; failure reason stored
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Submitted => "submitted",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(OperationStatus::Pending),
            "submitted" => Ok(OperationStatus::Submitted),
            "completed" => Ok(OperationStatus::Completed),
            "failed" => Ok(OperationStatus::Failed),
            _ => Err(format!("Unknown operation status: {}", s)),
        }
    }
}

/// Why an operation ended up `failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    Encoding,
    Signing,
    GatewayUnavailable,
    BroadcastRejected,
    InclusionFailed,
    InclusionTimeout,
    Reverted,
    /// Found `submitted` at startup with no transaction hash to follow
    Abandoned,
    WorkerPanicked,
    /// Another unfinished record already held the same `(sender, nonce)` at startup
    SlotConflict,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::Encoding => "encoding",
            FailureCode::Signing => "signing",
            FailureCode::GatewayUnavailable => "gateway_unavailable",
            FailureCode::BroadcastRejected => "broadcast_rejected",
            FailureCode::InclusionFailed => "inclusion_failed",
            FailureCode::InclusionTimeout => "inclusion_timeout",
            FailureCode::Reverted => "reverted",
            FailureCode::Abandoned => "abandoned",
            FailureCode::WorkerPanicked => "worker_panicked",
            FailureCode::SlotConflict => "slot_conflict",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "encoding" => Ok(FailureCode::Encoding),
            "signing" => Ok(FailureCode::Signing),
            "gateway_unavailable" => Ok(FailureCode::GatewayUnavailable),
            "broadcast_rejected" => Ok(FailureCode::BroadcastRejected),
            "inclusion_failed" => Ok(FailureCode::InclusionFailed),
            "inclusion_timeout" => Ok(FailureCode::InclusionTimeout),
            "reverted" => Ok(FailureCode::Reverted),
            "abandoned" => Ok(FailureCode::Abandoned),
            "worker_panicked" => Ok(FailureCode::WorkerPanicked),
            "slot_conflict" => Ok(FailureCode::SlotConflict),
            _ => Err(format!("Unknown failure code: {}", s)),
        }
    }
}

/// Failure detail persisted alongside `failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub code: FailureCode,
    pub message: String,
}

impl FailureReason {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Ledger confirmation for an included relay transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationReceipt {
    pub transaction_hash: B256,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub success: bool,
    pub logs: Vec<ReceiptLog>,
}

/// Terminal result of a submission. The only input to a terminal write, so a
/// receipt can never be stored without `completed` (or vice versa).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Completed(OperationReceipt),
    Failed(FailureReason),
}

impl SubmissionOutcome {
    pub fn status(&self) -> OperationStatus {
        match self {
            SubmissionOutcome::Completed(_) => OperationStatus::Completed,
            SubmissionOutcome::Failed(_) => OperationStatus::Failed,
        }
    }
}

/// Persisted lifecycle of one accepted operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    pub id: String,
    pub operation: UserOperation,
    pub status: OperationStatus,
    pub receipt: Option<OperationReceipt>,
    pub tx_hash: Option<B256>,
    pub failure: Option<FailureReason>,
    /// Epoch seconds
    pub created_at: i64,
    /// Epoch seconds
    pub updated_at: i64,
}

impl OperationRecord {
    pub fn new_pending(id: String, operation: UserOperation, now: i64) -> Self {
        Self {
            id,
            operation,
            status: OperationStatus::Pending,
            receipt: None,
            tx_hash: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Response for status and history queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatusView {
    pub op_hash: String,
    pub status: OperationStatus,
    /// Null unless `completed`
    pub receipt: Option<OperationReceipt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureReason>,
}

impl From<OperationRecord> for OperationStatusView {
    fn from(record: OperationRecord) -> Self {
        Self {
            op_hash: record.id,
            status: record.status,
            receipt: record.receipt,
            tx_hash: record.tx_hash,
            error: record.failure,
        }
    }
}
