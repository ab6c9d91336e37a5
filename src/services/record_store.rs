//! Durable operation record store
//!
//! Records live in the `operations` table. Every state transition is a single
//! conditional UPDATE keyed by id and the allowed source statuses, so two writers
//! racing on the same record cannot both win, and writers on different records
//! never wait on each other.

use alloy::primitives::B256;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, SqlErr,
};
use std::str::FromStr;
use tracing::{debug, error};

use crate::entities::operations;
use crate::entities::prelude::Operations;
use crate::models::record::{
    FailureReason, OperationRecord, OperationStatus, SubmissionOutcome,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("operation {0} not found")]
    NotFound(String),
    #[error("operation id {0} already exists")]
    DuplicateId(String),
    /// Transition requested from a status that does not allow it. A programming
    /// error in the caller, never retried.
    #[error("operation {id} is {status}, cannot move to {target}")]
    InvalidTransition {
        id: String,
        status: OperationStatus,
        target: OperationStatus,
    },
    #[error("stored operation {id} is unreadable: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

impl StoreError {
    /// The target record had already reached `completed` or `failed`
    pub fn is_already_terminal(&self) -> bool {
        matches!(self, StoreError::InvalidTransition { status, .. } if status.is_terminal())
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, record: &OperationRecord) -> Result<(), StoreError>;

    /// `pending -> submitted`, remembering the relay transaction hash
    async fn mark_submitted(&self, id: &str, tx_hash: B256) -> Result<(), StoreError>;

    /// `pending | submitted -> completed | failed`
    async fn update_status(&self, id: &str, outcome: &SubmissionOutcome) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<OperationRecord, StoreError>;

    /// Every record, ordered by creation time then id
    async fn list_all(&self) -> Result<Vec<OperationRecord>, StoreError>;

    /// Records still `pending` or `submitted`
    async fn list_unfinished(&self) -> Result<Vec<OperationRecord>, StoreError>;
}

/// Record store over a SeaORM connection pool
#[derive(Clone)]
pub struct SeaOrmRecordStore {
    db: DatabaseConnection,
}

impl SeaOrmRecordStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Works out why a conditional update touched no rows
    async fn transition_rejected(&self, id: &str, target: OperationStatus) -> StoreError {
        match self.get(id).await {
            Ok(record) => StoreError::InvalidTransition {
                id: id.to_string(),
                status: record.status,
                target,
            },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl RecordStore for SeaOrmRecordStore {
    async fn insert(&self, record: &OperationRecord) -> Result<(), StoreError> {
        let model = to_active_model(record)?;

        model.insert(&self.db).await.map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => StoreError::DuplicateId(record.id.clone()),
            _ => StoreError::Database(e),
        })?;

        debug!(op_hash = %record.id, "Inserted operation record");
        Ok(())
    }

    async fn mark_submitted(&self, id: &str, tx_hash: B256) -> Result<(), StoreError> {
        let result = Operations::update_many()
            .col_expr(
                operations::Column::Status,
                Expr::value(OperationStatus::Submitted.as_str()),
            )
            .col_expr(operations::Column::TxHash, Expr::value(tx_hash.to_string()))
            .col_expr(operations::Column::UpdatedAt, Expr::value(Utc::now().timestamp()))
            .filter(operations::Column::Id.eq(id))
            .filter(operations::Column::Status.eq(OperationStatus::Pending.as_str()))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(self.transition_rejected(id, OperationStatus::Submitted).await);
        }

        debug!(op_hash = %id, tx_hash = %tx_hash, "Operation marked submitted");
        Ok(())
    }

    async fn update_status(&self, id: &str, outcome: &SubmissionOutcome) -> Result<(), StoreError> {
        let target = outcome.status();
        let (receipt, error_code, error_message) = match outcome {
            SubmissionOutcome::Completed(receipt) => {
                let json = serde_json::to_string(receipt).map_err(|e| StoreError::Corrupt {
                    id: id.to_string(),
                    reason: format!("receipt does not serialize: {}", e),
                })?;
                (Some(json), None, None)
            }
            SubmissionOutcome::Failed(reason) => (
                None,
                Some(reason.code.as_str().to_string()),
                Some(reason.message.clone()),
            ),
        };

        let result = Operations::update_many()
            .col_expr(operations::Column::Status, Expr::value(target.as_str()))
            .col_expr(operations::Column::Receipt, Expr::value(receipt))
            .col_expr(operations::Column::ErrorCode, Expr::value(error_code))
            .col_expr(operations::Column::ErrorMessage, Expr::value(error_message))
            .col_expr(operations::Column::UpdatedAt, Expr::value(Utc::now().timestamp()))
            .filter(operations::Column::Id.eq(id))
            .filter(operations::Column::Status.is_in([
                OperationStatus::Pending.as_str(),
                OperationStatus::Submitted.as_str(),
            ]))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            let err = self.transition_rejected(id, target).await;
            if err.is_already_terminal() {
                error!(op_hash = %id, error = %err, "Terminal write on a finished operation");
            }
            return Err(err);
        }

        debug!(op_hash = %id, status = %target, "Operation reached terminal status");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<OperationRecord, StoreError> {
        let model = Operations::find_by_id(id.to_string())
            .one(&self.db)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        from_model(model)
    }

    async fn list_all(&self) -> Result<Vec<OperationRecord>, StoreError> {
        Operations::find()
            .order_by_asc(operations::Column::CreatedAt)
            .order_by_asc(operations::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(from_model)
            .collect()
    }

    async fn list_unfinished(&self) -> Result<Vec<OperationRecord>, StoreError> {
        Operations::find()
            .filter(operations::Column::Status.is_in([
                OperationStatus::Pending.as_str(),
                OperationStatus::Submitted.as_str(),
            ]))
            .order_by_asc(operations::Column::CreatedAt)
            .order_by_asc(operations::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(from_model)
            .collect()
    }
}

fn to_active_model(record: &OperationRecord) -> Result<operations::ActiveModel, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        id: record.id.clone(),
        reason,
    };

    let user_op = serde_json::to_string(&record.operation)
        .map_err(|e| corrupt(format!("operation does not serialize: {}", e)))?;
    let receipt = record
        .receipt
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| corrupt(format!("receipt does not serialize: {}", e)))?;

    Ok(operations::ActiveModel {
        id: Set(record.id.clone()),
        user_op: Set(user_op),
        status: Set(record.status.as_str().to_string()),
        receipt: Set(receipt),
        tx_hash: Set(record.tx_hash.map(|h| h.to_string())),
        error_code: Set(record.failure.as_ref().map(|f| f.code.as_str().to_string())),
        error_message: Set(record.failure.as_ref().map(|f| f.message.clone())),
        created_at: Set(record.created_at),
        updated_at: Set(record.updated_at),
    })
}

fn from_model(model: operations::Model) -> Result<OperationRecord, StoreError> {
    let id = model.id;
    let corrupt = |reason: String| StoreError::Corrupt {
        id: id.clone(),
        reason,
    };

    let operation = serde_json::from_str(&model.user_op)
        .map_err(|e| corrupt(format!("bad operation snapshot: {}", e)))?;
    let status = OperationStatus::from_str(&model.status).map_err(corrupt)?;
    let receipt = model
        .receipt
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| corrupt(format!("bad receipt: {}", e)))?;
    let tx_hash = model
        .tx_hash
        .as_deref()
        .map(B256::from_str)
        .transpose()
        .map_err(|e| corrupt(format!("bad tx hash: {}", e)))?;
    let failure = match model.error_code {
        Some(code) => Some(FailureReason {
            code: code.parse().map_err(corrupt)?,
            message: model.error_message.unwrap_or_default(),
        }),
        None => None,
    };

    Ok(OperationRecord {
        id,
        operation,
        status,
        receipt,
        tx_hash,
        failure,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}
