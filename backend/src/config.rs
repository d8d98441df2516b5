use serde::{Deserialize, Serialize};
use serde_yaml;
use shared::{DetectionResult, MediaType};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "config/detector.yaml";
pub const MAX_UPLOAD_SIZE_MB: u64 = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidOverride { key: String, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Dynamodb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub backend: BackendConfig,
    pub thresholds: ThresholdConfig,
    pub image: ImageConfig,
    pub video: VideoConfig,
    pub uploads: UploadConfig,
    pub store: StoreConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub mode: BackendMode,
    pub model_path: PathBuf,
    pub model_version: String,
    pub remote_url: String,
    pub timeout_secs: u64,
    pub workers: usize,
    /// External deadline around a single `detect` call. Mostly useful in local mode,
    /// which has no timeout of its own.
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub image: Thresholds,
    pub video: Thresholds,
}

/// Score cut-offs for turning a fake probability into a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub fake: f64,
    pub real: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub size: u32,
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub max_frames: usize,
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub dir: PathBuf,
    pub max_file_size_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub inference_port: u16,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            thresholds: ThresholdConfig::default(),
            image: ImageConfig::default(),
            video: VideoConfig::default(),
            uploads: UploadConfig::default(),
            store: StoreConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            mode: BackendMode::Remote,
            model_path: PathBuf::from("models/deepfake_detector.pt"),
            model_version: "v1.0".to_string(),
            remote_url: "http://127.0.0.1:8090/".to_string(),
            timeout_secs: 300,
            workers: 2,
            deadline_secs: None,
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            image: Thresholds {
                fake: 0.7,
                real: 0.3,
            },
            video: Thresholds {
                fake: 0.6,
                real: 0.4,
            },
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            size: 224,
            extensions: ["jpg", "jpeg", "png", "bmp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            max_frames: 30,
            extensions: ["mp4", "avi", "mov", "mkv"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("uploads"),
            max_file_size_mb: 50,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            table: "detections".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            inference_port: 8090,
        }
    }
}

impl Thresholds {
    pub fn label(&self, score: f64) -> DetectionResult {
        if score > self.fake {
            DetectionResult::Fake
        } else if score < self.real {
            DetectionResult::Real
        } else {
            DetectionResult::Uncertain
        }
    }
}

impl ThresholdConfig {
    pub fn for_media(&self, media_type: MediaType) -> Thresholds {
        match media_type {
            MediaType::Image => self.image,
            MediaType::Video => self.video,
        }
    }
}

impl DetectorConfig {
    /// Reads the YAML file named by `DETECTOR_CONFIG` (or the default path), then applies
    /// environment overrides. A missing file means defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("DETECTOR_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: DetectorConfig = serde_yaml::from_str(&config_str)?;
        log::info!("Loaded detector configuration from {}", path.display());
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup("DETECTOR_MODE") {
            self.backend.mode = match mode.to_ascii_lowercase().as_str() {
                "local" => BackendMode::Local,
                "remote" => BackendMode::Remote,
                _ => return Err(invalid("DETECTOR_MODE", &mode)),
            };
        }
        if let Some(path) = lookup("MODEL_PATH") {
            self.backend.model_path = PathBuf::from(path);
        }
        if let Some(version) = lookup("MODEL_VERSION") {
            self.backend.model_version = version;
        }
        if let Some(url) = lookup("INFERENCE_URL") {
            self.backend.remote_url = url;
        }
        if let Some(secs) = lookup("INFERENCE_TIMEOUT_SECS") {
            self.backend.timeout_secs = parse_number("INFERENCE_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("INFERENCE_DEADLINE_SECS") {
            self.backend.deadline_secs = Some(parse_number("INFERENCE_DEADLINE_SECS", &secs)?);
        }
        if let Some(workers) = lookup("INFERENCE_WORKERS") {
            self.backend.workers = parse_number("INFERENCE_WORKERS", &workers)?;
        }
        if let Some(dir) = lookup("UPLOAD_DIR") {
            self.uploads.dir = PathBuf::from(dir);
        }
        if let Some(size) = lookup("MAX_FILE_SIZE_MB") {
            self.uploads.max_file_size_mb = parse_number("MAX_FILE_SIZE_MB", &size)?;
        }
        if let Some(kind) = lookup("RECORD_STORE") {
            self.store.kind = match kind.to_ascii_lowercase().as_str() {
                "memory" => StoreKind::Memory,
                "dynamodb" => StoreKind::Dynamodb,
                _ => return Err(invalid("RECORD_STORE", &kind)),
            };
        }
        if let Some(table) = lookup("DYNAMODB_DETECTIONS_TABLE") {
            self.store.table = table;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = parse_number("PORT", &port)?;
        }
        if let Some(port) = lookup("INFERENCE_PORT") {
            self.server.inference_port = parse_number("INFERENCE_PORT", &port)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, t) in [("image", self.thresholds.image), ("video", self.thresholds.video)] {
            let in_range = (0.0..=1.0).contains(&t.fake) && (0.0..=1.0).contains(&t.real);
            if !in_range || t.real > t.fake {
                return Err(ConfigError::Invalid(format!(
                    "{} thresholds must satisfy 0 <= real <= fake <= 1 (got real={}, fake={})",
                    name, t.real, t.fake
                )));
            }
        }
        if self.backend.timeout_secs == 0 {
            return Err(ConfigError::Invalid("backend.timeout_secs must be positive".into()));
        }
        if self.backend.workers == 0 {
            return Err(ConfigError::Invalid("backend.workers must be positive".into()));
        }
        if self.backend.deadline_secs == Some(0) {
            return Err(ConfigError::Invalid("backend.deadline_secs must be positive".into()));
        }
        if !(1..=MAX_UPLOAD_SIZE_MB).contains(&self.uploads.max_file_size_mb) {
            return Err(ConfigError::Invalid(format!(
                "uploads.max_file_size_mb must be between 1 and {}",
                MAX_UPLOAD_SIZE_MB
            )));
        }
        if self.image.size == 0 || self.video.max_frames == 0 {
            return Err(ConfigError::Invalid(
                "image.size and video.max_frames must be positive".into(),
            ));
        }
        if self.backend.mode == BackendMode::Remote {
            self.remote_url()?;
        }
        Ok(())
    }

    pub fn remote_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.backend.remote_url).map_err(|e| {
            ConfigError::Invalid(format!(
                "backend.remote_url '{}' is not a valid URL: {}",
                self.backend.remote_url, e
            ))
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.backend.deadline_secs.map(Duration::from_secs)
    }

    pub fn extensions_for(&self, media_type: MediaType) -> &[String] {
        match media_type {
            MediaType::Image => &self.image.extensions,
            MediaType::Video => &self.video.extensions,
        }
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidOverride {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}
