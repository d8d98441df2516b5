use async_trait::async_trait;
use log::{error, info};
use serde_json::json;
use shared::MediaType;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

use super::preprocess::{FrameTensor, load_frame};
use super::video::{self, ExtractedFrames};
use super::{InferenceError, InferenceGateway, InferenceOutput};
use crate::config::{DetectorConfig, ThresholdConfig};

/// A loaded model that maps one preprocessed frame to the probability that it is synthetic.
pub trait ScoringModel: Send + Sync {
    fn score(&self, frame: &FrameTensor) -> Result<f64, InferenceError>;
}

#[derive(Debug, Clone, Copy)]
struct LocalSettings {
    thresholds: ThresholdConfig,
    image_size: u32,
    max_frames: usize,
}

/// In-process detector. The model is loaded once at construction; when that load failed
/// every call reports `BackendUnavailable` without retrying.
pub struct LocalDetector {
    model: Result<Arc<dyn ScoringModel>, String>,
    model_version: String,
    settings: LocalSettings,
    workers: Arc<Semaphore>,
}

impl LocalDetector {
    pub fn new(model: Arc<dyn ScoringModel>, config: &DetectorConfig) -> Self {
        Self::with_model(Ok(model), config)
    }

    pub fn unavailable(reason: impl Into<String>, config: &DetectorConfig) -> Self {
        Self::with_model(Err(reason.into()), config)
    }

    fn with_model(model: Result<Arc<dyn ScoringModel>, String>, config: &DetectorConfig) -> Self {
        Self {
            model,
            model_version: config.backend.model_version.clone(),
            settings: LocalSettings {
                thresholds: config.thresholds,
                image_size: config.image.size,
                max_frames: config.video.max_frames,
            },
            workers: Arc::new(Semaphore::new(config.backend.workers)),
        }
    }

    #[cfg(feature = "torch")]
    pub fn load(config: &DetectorConfig) -> Self {
        let path = &config.backend.model_path;
        match super::torch::TorchModel::load(path) {
            Ok(model) => {
                info!("Model {} loaded from {}", config.backend.model_version, path.display());
                Self::new(Arc::new(model), config)
            }
            Err(e) => {
                error!("Failed to load model from {}: {}", path.display(), e);
                Self::unavailable(e.to_string(), config)
            }
        }
    }

    #[cfg(not(feature = "torch"))]
    pub fn load(config: &DetectorConfig) -> Self {
        let reason = format!(
            "cannot load {}: built without torch support",
            config.backend.model_path.display()
        );
        error!("{}", reason);
        Self::unavailable(reason, config)
    }

    pub fn load_error(&self) -> Option<&str> {
        self.model.as_ref().err().map(String::as_str)
    }
}

#[async_trait]
impl InferenceGateway for LocalDetector {
    async fn detect(
        &self,
        media_path: &Path,
        media_type: MediaType,
    ) -> Result<InferenceOutput, InferenceError> {
        let model = match &self.model {
            Ok(model) => Arc::clone(model),
            Err(reason) => return Err(InferenceError::BackendUnavailable(reason.clone())),
        };
        let started = Instant::now();
        // Owned by the blocking closure, released only when the model call returns.
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| InferenceError::BackendUnavailable("worker pool closed".into()))?;
        let settings = self.settings;

        let (score, metadata) = match media_type {
            MediaType::Image => {
                let path = media_path.to_path_buf();
                run_blocking(move || {
                    let _permit = permit;
                    score_image(model.as_ref(), &path, settings.image_size)
                })
                .await?
            }
            MediaType::Video => {
                let extracted =
                    video::extract_frames(media_path, settings.max_frames, settings.image_size)
                        .await?;
                run_blocking(move || {
                    let _permit = permit;
                    score_video(model.as_ref(), &extracted, settings.image_size)
                })
                .await?
            }
        };

        let result = settings.thresholds.for_media(media_type).label(score);
        info!(
            "Local inference on {} ({}): {} with score {:.4}",
            media_path.display(),
            media_type,
            result,
            score
        );
        InferenceOutput {
            result,
            confidence_score: score,
            processing_time_seconds: started.elapsed().as_secs_f64(),
            model_version: self.model_version.clone(),
            metadata,
        }
        .validate()
    }

    async fn health_check(&self) -> bool {
        self.model.is_ok()
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

async fn run_blocking<F, T>(work: F) -> Result<T, InferenceError>
where
    F: FnOnce() -> Result<T, InferenceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| InferenceError::Model(format!("inference worker failed: {}", e)))?
}

type Scored = (f64, HashMap<String, serde_json::Value>);

fn score_image(model: &dyn ScoringModel, path: &Path, size: u32) -> Result<Scored, InferenceError> {
    let frame = load_frame(path, size)?;
    let score = model.score(&frame)?;
    let metadata = HashMap::from([
        ("input_type".to_string(), json!("image")),
        ("image_shape".to_string(), json!(frame.shape())),
    ]);
    Ok((score, metadata))
}

fn score_video(
    model: &dyn ScoringModel,
    extracted: &ExtractedFrames,
    size: u32,
) -> Result<Scored, InferenceError> {
    let mut predictions = Vec::with_capacity(extracted.frames.len());
    for path in &extracted.frames {
        let frame = load_frame(path, size)?;
        predictions.push(model.score(&frame)?);
    }
    let score = predictions.iter().sum::<f64>() / predictions.len() as f64;
    let metadata = HashMap::from([
        ("input_type".to_string(), json!("video")),
        ("frames_analyzed".to_string(), json!(predictions.len())),
        ("frame_predictions".to_string(), json!(predictions)),
    ]);
    Ok((score, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use shared::DetectionResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedModel {
        score: f64,
        calls: AtomicUsize,
    }

    impl FixedModel {
        fn new(score: f64) -> Arc<Self> {
            Arc::new(Self {
                score,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl ScoringModel for FixedModel {
        fn score(&self, _frame: &FrameTensor) -> Result<f64, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.score)
        }
    }

    struct PanickingModel;

    impl ScoringModel for PanickingModel {
        fn score(&self, _frame: &FrameTensor) -> Result<f64, InferenceError> {
            panic!("tensor shape mismatch");
        }
    }

    fn sample_image(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("face.png");
        RgbImage::from_pixel(32, 32, Rgb([120, 90, 60])).save(&path).unwrap();
        path
    }

    #[tokio::test]
    async fn image_detection_uses_model_score_and_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let model = FixedModel::new(0.92);
        let detector = LocalDetector::new(model.clone(), &DetectorConfig::default());

        let output = detector
            .detect(&sample_image(dir.path()), MediaType::Image)
            .await
            .unwrap();

        assert_eq!(output.result, DetectionResult::Fake);
        assert_eq!(output.confidence_score, 0.92);
        assert_eq!(output.model_version, "v1.0");
        assert!(output.processing_time_seconds >= 0.0);
        assert_eq!(output.metadata["input_type"], "image");
        assert_eq!(output.metadata["image_shape"], json!([3, 224, 224]));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn middling_score_is_uncertain() {
        let dir = tempfile::tempdir().unwrap();
        let detector = LocalDetector::new(FixedModel::new(0.5), &DetectorConfig::default());
        let output = detector
            .detect(&sample_image(dir.path()), MediaType::Image)
            .await
            .unwrap();
        assert_eq!(output.result, DetectionResult::Uncertain);
    }

    #[tokio::test]
    async fn failed_load_reports_unavailable_on_every_call() {
        let dir = tempfile::tempdir().unwrap();
        let detector = LocalDetector::unavailable("model file missing", &DetectorConfig::default());
        let path = sample_image(dir.path());

        for _ in 0..2 {
            let err = detector.detect(&path, MediaType::Image).await.unwrap_err();
            assert!(matches!(err, InferenceError::BackendUnavailable(ref m) if m == "model file missing"));
        }
        assert!(!detector.health_check().await);
        assert_eq!(detector.load_error(), Some("model file missing"));
    }

    #[tokio::test]
    async fn loaded_detector_is_healthy() {
        let detector = LocalDetector::new(FixedModel::new(0.1), &DetectorConfig::default());
        assert!(detector.health_check().await);
        assert_eq!(detector.load_error(), None);
        assert_eq!(detector.kind(), "local");
    }

    #[tokio::test]
    async fn missing_media_is_a_preprocessing_error() {
        let model = FixedModel::new(0.9);
        let detector = LocalDetector::new(model.clone(), &DetectorConfig::default());
        let err = detector
            .detect(Path::new("/nonexistent/face.png"), MediaType::Image)
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Preprocessing(_)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn out_of_range_model_score_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let detector = LocalDetector::new(FixedModel::new(1.7), &DetectorConfig::default());
        let err = detector
            .detect(&sample_image(dir.path()), MediaType::Image)
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::InvalidOutput(_)));
    }

    #[tokio::test]
    async fn model_panic_becomes_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let detector = LocalDetector::new(Arc::new(PanickingModel), &DetectorConfig::default());
        let err = detector
            .detect(&sample_image(dir.path()), MediaType::Image)
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Model(_)));
    }

    struct SlowModel {
        running: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl ScoringModel for SlowModel {
        fn score(&self, _frame: &FrameTensor) -> Result<f64, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(400));
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(0.4)
        }
    }

    #[tokio::test]
    async fn aborted_calls_keep_their_worker_until_the_model_returns() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_image(dir.path());
        let model = Arc::new(SlowModel {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let mut config = DetectorConfig::default();
        config.backend.workers = 1;
        let detector = Arc::new(LocalDetector::new(model.clone(), &config));

        for _ in 0..3 {
            let detector = Arc::clone(&detector);
            let path = path.clone();
            let call = tokio::spawn(async move { detector.detect(&path, MediaType::Image).await });
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            call.abort();
        }

        let output = detector.detect(&path, MediaType::Image).await.unwrap();
        assert_eq!(output.confidence_score, 0.4);
        assert_eq!(model.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn undecodable_video_is_a_preprocessing_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"not really a video").unwrap();
        let model = FixedModel::new(0.9);
        let detector = LocalDetector::new(model.clone(), &DetectorConfig::default());

        let err = detector.detect(&path, MediaType::Video).await.unwrap_err();
        assert!(matches!(err, InferenceError::Preprocessing(_)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }
}
