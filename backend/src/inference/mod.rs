pub mod local;
pub mod preprocess;
pub mod remote;
pub mod server;
#[cfg(feature = "torch")]
pub mod torch;
pub mod video;

use async_trait::async_trait;
use serde::Serialize;
use shared::{DetectResponse, DetectionResult, MediaType};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::{BackendMode, DetectorConfig};
use local::LocalDetector;
use remote::RemoteDetector;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Inference backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("Preprocessing failed: {0}")]
    Preprocessing(String),
    #[error("Invalid backend output: {0}")]
    InvalidOutput(String),
    #[error("Model error: {0}")]
    Model(String),
}

/// One backend verdict, before it is folded into a detection record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceOutput {
    pub result: DetectionResult,
    pub confidence_score: f64,
    pub processing_time_seconds: f64,
    pub model_version: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InferenceOutput {
    pub fn validate(self) -> Result<Self, InferenceError> {
        if !(0.0..=1.0).contains(&self.confidence_score) {
            return Err(InferenceError::InvalidOutput(format!(
                "confidence score {} outside [0, 1]",
                self.confidence_score
            )));
        }
        if !self.processing_time_seconds.is_finite() || self.processing_time_seconds < 0.0 {
            return Err(InferenceError::InvalidOutput(format!(
                "processing time {} is not a non-negative number",
                self.processing_time_seconds
            )));
        }
        Ok(self)
    }
}

impl From<DetectResponse> for InferenceOutput {
    fn from(response: DetectResponse) -> Self {
        Self {
            result: response.result,
            confidence_score: response.confidence_score,
            processing_time_seconds: response.processing_time_seconds,
            model_version: response.model_version,
            metadata: response.metadata,
        }
    }
}

impl From<InferenceOutput> for DetectResponse {
    fn from(output: InferenceOutput) -> Self {
        Self {
            result: output.result,
            confidence_score: output.confidence_score,
            processing_time_seconds: output.processing_time_seconds,
            metadata: output.metadata,
            model_version: output.model_version,
        }
    }
}

/// Uniform contract over the in-process and remote detectors.
#[async_trait]
pub trait InferenceGateway: Send + Sync {
    async fn detect(
        &self,
        media_path: &Path,
        media_type: MediaType,
    ) -> Result<InferenceOutput, InferenceError>;

    /// Liveness probe. Never fails; an unreachable or unloaded backend is `false`.
    async fn health_check(&self) -> bool;

    fn kind(&self) -> &'static str;
}

/// Builds the configured backend once. In local mode the model is loaded here and the
/// call fails if that load fails.
pub fn build_gateway(config: &DetectorConfig) -> Result<Arc<dyn InferenceGateway>, InferenceError> {
    match config.backend.mode {
        BackendMode::Local => {
            let detector = LocalDetector::load(config);
            if let Some(reason) = detector.load_error() {
                return Err(InferenceError::BackendUnavailable(reason.to_string()));
            }
            Ok(Arc::new(detector))
        }
        BackendMode::Remote => {
            let url = config
                .remote_url()
                .map_err(|e| InferenceError::BackendUnavailable(e.to_string()))?;
            let detector = RemoteDetector::new(&url, config.timeout())?;
            Ok(Arc::new(detector))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(score: f64, seconds: f64) -> InferenceOutput {
        InferenceOutput {
            result: DetectionResult::Fake,
            confidence_score: score,
            processing_time_seconds: seconds,
            model_version: "v1.0".into(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn validate_accepts_scores_in_unit_interval() {
        assert!(output(0.0, 0.0).validate().is_ok());
        assert!(output(1.0, 3.5).validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        assert!(matches!(output(1.01, 1.0).validate(), Err(InferenceError::InvalidOutput(_))));
        assert!(matches!(output(f64::NAN, 1.0).validate(), Err(InferenceError::InvalidOutput(_))));
        assert!(matches!(output(0.5, -1.0).validate(), Err(InferenceError::InvalidOutput(_))));
    }

    #[test]
    fn local_mode_without_a_model_fails_at_build_time() {
        let mut config = DetectorConfig::default();
        config.backend.mode = BackendMode::Local;
        config.backend.model_path = "/nonexistent/model.pt".into();
        assert!(matches!(
            build_gateway(&config),
            Err(InferenceError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn remote_mode_builds_without_contacting_the_backend() {
        let config = DetectorConfig::default();
        let gateway = build_gateway(&config).unwrap();
        assert_eq!(gateway.kind(), "remote");
    }
}
