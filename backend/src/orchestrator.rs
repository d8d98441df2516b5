use log::{error, info, warn};
use shared::{DetectionStatus, MediaType};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::classifier::classify;
use crate::inference::{InferenceError, InferenceGateway, InferenceOutput};
use crate::records::{DetectionOutcome, DetectionRecord, DetectionUpdate, RecordStore, StoreError};

/// Rejections raised before a record leaves PENDING. After that point only a record store
/// that refuses the terminal write, or a dead processing task, is reported this way.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Detection {0} not found")]
    NotFound(Uuid),
    #[error("Detection {0} is already being processed")]
    AlreadyProcessing(Uuid),
    #[error("Detection {id} already finished as {status}")]
    AlreadyTerminal { id: Uuid, status: DetectionStatus },
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("Record store error: {0}")]
    Store(StoreError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ProcessError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ProcessError::NotFound(id),
            other => ProcessError::Store(other),
        }
    }
}

/// Terminal result of `process`.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Completed(DetectionRecord),
    Failed {
        record: DetectionRecord,
        reason: String,
    },
}

impl ProcessOutcome {
    pub fn record(&self) -> &DetectionRecord {
        match self {
            ProcessOutcome::Completed(record) => record,
            ProcessOutcome::Failed { record, .. } => record,
        }
    }

    pub fn into_record(self) -> DetectionRecord {
        match self {
            ProcessOutcome::Completed(record) => record,
            ProcessOutcome::Failed { record, .. } => record,
        }
    }
}

/// Removes its id from the in-flight set when dropped.
struct InFlight {
    ids: Arc<Mutex<HashSet<Uuid>>>,
    id: Uuid,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

pub struct DetectionOrchestrator {
    store: Arc<dyn RecordStore>,
    gateway: Arc<dyn InferenceGateway>,
    deadline: Option<Duration>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl DetectionOrchestrator {
    pub fn new(store: Arc<dyn RecordStore>, gateway: Arc<dyn InferenceGateway>) -> Self {
        Self {
            store,
            gateway,
            deadline: None,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Bounds each backend call; expiry counts as an unavailable backend.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn gateway(&self) -> &Arc<dyn InferenceGateway> {
        &self.gateway
    }

    /// Drives one PENDING record to COMPLETED or FAILED.
    ///
    /// Returns `Err` only for rejections that leave the record untouched. Once the record
    /// is PROCESSING, every failure is written to the record and reported as
    /// `ProcessOutcome::Failed`. The work after the PROCESSING write runs on its own task,
    /// so dropping the returned future does not strand the record.
    pub async fn process(&self, id: Uuid) -> Result<ProcessOutcome, ProcessError> {
        let in_flight = self.claim(id)?;

        let record = self.store.get(id).await?;
        match record.status {
            DetectionStatus::Pending => {}
            DetectionStatus::Processing => return Err(ProcessError::AlreadyProcessing(id)),
            status => return Err(ProcessError::AlreadyTerminal { id, status }),
        }

        let media_type: MediaType = record.media_type.parse().map_err(|_| {
            warn!("Detection {} has unsupported media type '{}'", id, record.media_type);
            ProcessError::UnsupportedMediaType(record.media_type.clone())
        })?;

        let record = match self
            .store
            .update_if_status(id, DetectionStatus::Pending, DetectionUpdate::processing())
            .await
        {
            Ok(record) => record,
            Err(StoreError::Conflict { .. }) => return Err(ProcessError::AlreadyProcessing(id)),
            Err(e) => return Err(e.into()),
        };
        info!("Detection {} is processing ({}, {})", id, media_type, record.media_path);

        let attempt = Attempt {
            store: Arc::clone(&self.store),
            gateway: Arc::clone(&self.gateway),
            deadline: self.deadline,
            record,
            media_type,
            _in_flight: in_flight,
        };
        tokio::spawn(attempt.run()).await.map_err(|e| {
            error!("Processing task for detection {} died: {}", id, e);
            ProcessError::Internal(format!("processing task for {} did not finish", id))
        })?
    }

    fn claim(&self, id: Uuid) -> Result<InFlight, ProcessError> {
        let mut ids = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(id) {
            warn!("Detection {} is already in flight", id);
            return Err(ProcessError::AlreadyProcessing(id));
        }
        Ok(InFlight {
            ids: Arc::clone(&self.in_flight),
            id,
        })
    }
}

/// One claimed record on its way from PROCESSING to a terminal status.
struct Attempt {
    store: Arc<dyn RecordStore>,
    gateway: Arc<dyn InferenceGateway>,
    deadline: Option<Duration>,
    record: DetectionRecord,
    media_type: MediaType,
    _in_flight: InFlight,
}

impl Attempt {
    async fn run(self) -> Result<ProcessOutcome, ProcessError> {
        let id = self.record.id;
        match self.run_inference().await {
            Ok(output) => {
                let outcome = DetectionOutcome {
                    result: output.result,
                    confidence_score: output.confidence_score,
                    confidence_level: classify(output.confidence_score),
                    processing_time_seconds: output.processing_time_seconds,
                    model_version: output.model_version,
                };
                let update = DetectionUpdate::completed(outcome, output.metadata);
                match self.finish(update).await {
                    Ok(record) => {
                        info!(
                            "Detection {} completed: {:?} ({:?} confidence)",
                            id,
                            record.outcome.as_ref().map(|o| o.result),
                            record.outcome.as_ref().map(|o| o.confidence_level)
                        );
                        Ok(ProcessOutcome::Completed(record))
                    }
                    Err(e) => {
                        error!("Failed to persist result for detection {}: {}", id, e);
                        self.fail("Failed to persist detection result".to_string())
                            .await
                    }
                }
            }
            Err(reason) => self.fail(reason).await,
        }
    }

    /// Runs the backend call on its own task so a panic inside the gateway surfaces as an
    /// error instead of unwinding through the attempt.
    async fn run_inference(&self) -> Result<InferenceOutput, String> {
        let id = self.record.id;
        let gateway = Arc::clone(&self.gateway);
        let path = PathBuf::from(&self.record.media_path);
        let media_type = self.media_type;
        let mut call = tokio::spawn(async move { gateway.detect(&path, media_type).await });

        let joined = match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, &mut call).await {
                Ok(joined) => joined,
                Err(_) => {
                    call.abort();
                    let err = InferenceError::BackendUnavailable(format!(
                        "no result within {}s",
                        deadline.as_secs_f64()
                    ));
                    warn!("Detection {}: {}", id, err);
                    return Err(err.to_string());
                }
            },
            None => call.await,
        };

        match joined {
            Ok(Ok(output)) => output.validate().map_err(|e| e.to_string()),
            Ok(Err(e)) => {
                warn!("Inference for detection {} failed: {}", id, e);
                Err(e.to_string())
            }
            Err(e) => {
                error!("Inference task for detection {} aborted: {}", id, e);
                Err("Internal error during inference".to_string())
            }
        }
    }

    async fn finish(&self, update: DetectionUpdate) -> Result<DetectionRecord, StoreError> {
        self.store
            .update_if_status(self.record.id, DetectionStatus::Processing, update)
            .await
    }

    async fn fail(&self, reason: String) -> Result<ProcessOutcome, ProcessError> {
        let id = self.record.id;
        let record = self
            .finish(DetectionUpdate::failed(reason.clone()))
            .await
            .map_err(|e| {
                error!("Failed to record failure for detection {}: {}", id, e);
                ProcessError::Store(e)
            })?;
        info!("Detection {} failed: {}", id, reason);
        Ok(ProcessOutcome::Failed { record, reason })
    }
}
