//! Status service: read-only views over the record store

use std::sync::Arc;

use crate::models::record::OperationStatusView;
use crate::services::record_store::{RecordStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("operation {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for StatusError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => StatusError::NotFound(id),
            other => StatusError::Store(other),
        }
    }
}

#[derive(Clone)]
pub struct StatusService {
    store: Arc<dyn RecordStore>,
}

impl StatusService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn get_status(&self, id: &str) -> Result<OperationStatusView, StatusError> {
        Ok(self.store.get(id).await?.into())
    }

    /// Every record ever accepted, no paging
    pub async fn list_history(&self) -> Result<Vec<OperationStatusView>, StatusError> {
        Ok(self
            .store
            .list_all()
            .await?
            .into_iter()
            .map(OperationStatusView::from)
            .collect())
    }
}
