use async_trait::async_trait;
use log::{error, info, warn};
use reqwest::multipart::{Form, Part};
use shared::{DetectResponse, MediaType};
use std::path::Path;
use std::time::Duration;
use url::Url;

use super::{InferenceError, InferenceGateway, InferenceOutput};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Detector reached over HTTP (`POST /detect`, `GET /health`).
#[derive(Clone)]
pub struct RemoteDetector {
    client: reqwest::Client,
    detect_url: Url,
    health_url: Url,
    timeout: Duration,
}

impl RemoteDetector {
    pub fn new(base_url: &Url, timeout: Duration) -> Result<Self, InferenceError> {
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let join = |endpoint: &str| {
            base.join(endpoint).map_err(|e| {
                InferenceError::BackendUnavailable(format!("invalid backend URL {}: {}", base, e))
            })
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::BackendUnavailable(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self {
            client,
            detect_url: join("detect")?,
            health_url: join("health")?,
            timeout,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> InferenceError {
        let reason = if e.is_timeout() {
            format!("no response from {} within {}s", self.detect_url, self.timeout.as_secs_f64())
        } else if e.is_connect() {
            format!("cannot connect to {}: {}", self.detect_url, e)
        } else {
            format!("request to {} failed: {}", self.detect_url, e)
        };
        InferenceError::BackendUnavailable(reason)
    }
}

#[async_trait]
impl InferenceGateway for RemoteDetector {
    async fn detect(
        &self,
        media_path: &Path,
        media_type: MediaType,
    ) -> Result<InferenceOutput, InferenceError> {
        let data = tokio::fs::read(media_path).await.map_err(|e| {
            InferenceError::Preprocessing(format!("cannot read {}: {}", media_path.display(), e))
        })?;
        let file_name = media_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("media")
            .to_string();
        let form = Form::new()
            .part("file", Part::bytes(data).file_name(file_name))
            .text("media_type", media_type.to_string());

        info!("Sending {} ({}) to {}", media_path.display(), media_type, self.detect_url);
        let response = self
            .client
            .post(self.detect_url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Inference backend answered {} for {}", status, media_path.display());
            return Err(InferenceError::BackendUnavailable(format!(
                "inference backend returned {}",
                status
            )));
        }

        let body: DetectResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.transport_error(e)
            } else {
                error!("Unreadable response from {}: {}", self.detect_url, e);
                InferenceError::InvalidOutput(format!("unreadable response body: {}", e))
            }
        })?;
        InferenceOutput::from(body).validate()
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(self.health_url.clone())
            .timeout(HEALTH_TIMEOUT.min(self.timeout))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("Health check against {} failed: {}", self.health_url, e);
                false
            }
        }
    }

    fn kind(&self) -> &'static str {
        "remote"
    }
}
