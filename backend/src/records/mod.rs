pub mod dynamodb;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{ConfidenceLevel, DetectionResponse, DetectionResult, DetectionStatus};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{DetectorConfig, StoreKind};

pub const MAX_PER_PAGE: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Detection {0} not found")]
    NotFound(Uuid),
    #[error("Detection {id} is {actual}, expected {expected}")]
    Conflict {
        id: Uuid,
        expected: DetectionStatus,
        actual: DetectionStatus,
    },
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Invalid data format: {0}")]
    InvalidData(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Fields only a completed detection carries. Present as a unit or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionOutcome {
    pub result: DetectionResult,
    pub confidence_score: f64,
    pub confidence_level: ConfidenceLevel,
    pub processing_time_seconds: f64,
    pub model_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: Uuid,
    pub media_path: String,
    /// Label supplied by whoever created the record; parsed when processing starts.
    pub media_type: String,
    pub file_name: String,
    pub file_size: u64,
    pub description: Option<String>,
    pub status: DetectionStatus,
    pub outcome: Option<DetectionOutcome>,
    pub error_message: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewDetection {
    pub media_path: String,
    pub media_type: String,
    pub file_name: String,
    pub file_size: u64,
    pub description: Option<String>,
}

/// Partial update applied by a store. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionUpdate {
    pub status: Option<DetectionStatus>,
    pub outcome: Option<DetectionOutcome>,
    pub error_message: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl DetectionRecord {
    pub fn new(new: NewDetection) -> Self {
        Self {
            id: Uuid::new_v4(),
            media_path: new.media_path,
            media_type: new.media_type,
            file_name: new.file_name,
            file_size: new.file_size,
            description: new.description,
            status: DetectionStatus::Pending,
            outcome: None,
            error_message: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Outcome present iff completed, error message present iff failed.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            DetectionStatus::Completed => self.outcome.is_some() && self.error_message.is_none(),
            DetectionStatus::Failed => self.outcome.is_none() && self.error_message.is_some(),
            DetectionStatus::Pending | DetectionStatus::Processing => {
                self.outcome.is_none() && self.error_message.is_none()
            }
        }
    }

    pub fn apply(&mut self, update: DetectionUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        match self.status {
            DetectionStatus::Completed => {
                if update.outcome.is_some() {
                    self.outcome = update.outcome;
                }
                self.error_message = None;
            }
            DetectionStatus::Failed => {
                if update.error_message.is_some() {
                    self.error_message = update.error_message;
                }
                self.outcome = None;
            }
            DetectionStatus::Pending | DetectionStatus::Processing => {
                self.outcome = None;
                self.error_message = None;
            }
        }
        if let Some(metadata) = update.metadata {
            self.metadata = metadata;
        }
        self.updated_at = Some(Utc::now());
        debug_assert!(self.is_consistent(), "inconsistent record {:?}", self);
    }
}

impl DetectionUpdate {
    pub fn processing() -> Self {
        Self {
            status: Some(DetectionStatus::Processing),
            ..Default::default()
        }
    }

    pub fn completed(
        outcome: DetectionOutcome,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            status: Some(DetectionStatus::Completed),
            outcome: Some(outcome),
            error_message: None,
            metadata: Some(metadata),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(DetectionStatus::Failed),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

impl From<DetectionRecord> for DetectionResponse {
    fn from(record: DetectionRecord) -> Self {
        let outcome = record.outcome;
        DetectionResponse {
            id: record.id,
            media_type: record.media_type,
            file_name: record.file_name,
            file_size: record.file_size,
            description: record.description,
            status: record.status,
            result: outcome.as_ref().map(|o| o.result),
            confidence_score: outcome.as_ref().map(|o| o.confidence_score),
            confidence_level: outcome.as_ref().map(|o| o.confidence_level),
            processing_time_seconds: outcome.as_ref().map(|o| o.processing_time_seconds),
            model_version: outcome.map(|o| o.model_version),
            metadata: record.metadata,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum PaginationError {
    #[error("Page number must be greater than 0")]
    InvalidPage,
    #[error("Per page must be between 1 and 100")]
    InvalidPerPage,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

fn default_page() -> usize {
    1
}

fn default_per_page() -> usize {
    20
}

impl Pagination {
    /// Returns `(limit, offset)` once the page parameters are known to be sane.
    pub fn bounds(&self) -> Result<(usize, usize), PaginationError> {
        if self.page < 1 {
            return Err(PaginationError::InvalidPage);
        }
        if self.per_page < 1 || self.per_page > MAX_PER_PAGE {
            return Err(PaginationError::InvalidPerPage);
        }
        let offset = (self.page - 1)
            .checked_mul(self.per_page)
            .ok_or(PaginationError::InvalidPage)?;
        Ok((self.per_page, offset))
    }
}

/// Persistence boundary for detection records.
///
/// Implementations must apply `update_if_status` atomically: the status check and the
/// write happen under one lock or one conditional write, so two orchestrators can never
/// both move the same record out of `expected`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, new: NewDetection) -> Result<DetectionRecord, StoreError>;

    async fn get(&self, id: Uuid) -> Result<DetectionRecord, StoreError>;

    async fn update(&self, id: Uuid, update: DetectionUpdate)
    -> Result<DetectionRecord, StoreError>;

    async fn update_if_status(
        &self,
        id: Uuid,
        expected: DetectionStatus,
        update: DetectionUpdate,
    ) -> Result<DetectionRecord, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Newest first.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<DetectionRecord>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

pub async fn build_store(config: &DetectorConfig) -> Arc<dyn RecordStore> {
    match config.store.kind {
        StoreKind::Memory => {
            log::info!("Using in-memory record store");
            Arc::new(memory::InMemoryRecordStore::new())
        }
        StoreKind::Dynamodb => {
            log::info!("Using DynamoDB record store (table: {})", config.store.table);
            let store = dynamodb::DynamoDbRecordStore::from_env(config.store.table.clone()).await;
            Arc::new(store)
        }
    }
}
