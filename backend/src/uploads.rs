use actix_multipart::Multipart;
use futures::{StreamExt, TryStreamExt};
use sha2::{Digest, Sha256};
use shared::MediaType;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::DetectorConfig;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("File size exceeds maximum allowed size of {0}MB")]
    FileTooLarge(u64),
    #[error("File extension '{extension}' not allowed for {media_type} files")]
    InvalidExtension {
        extension: String,
        media_type: MediaType,
    },
    #[error("Missing form field '{0}'")]
    MissingField(&'static str),
    #[error("Malformed multipart payload: {0}")]
    Multipart(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct UploadedFile {
    pub file_name: String,
    pub data: Vec<u8>,
}

/// Text fields plus the (single) file part of a multipart form.
pub struct UploadForm {
    pub file: Option<UploadedFile>,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Size and extension rules for incoming media.
#[derive(Clone, Debug)]
pub struct UploadPolicy {
    pub dir: PathBuf,
    pub max_file_size_mb: u64,
    pub image_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
}

impl UploadPolicy {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            dir: config.uploads.dir.clone(),
            max_file_size_mb: config.uploads.max_file_size_mb,
            image_extensions: config.extensions_for(MediaType::Image).to_vec(),
            video_extensions: config.extensions_for(MediaType::Video).to_vec(),
        }
    }

    pub fn validate_extension(
        &self,
        file_name: &str,
        media_type: MediaType,
    ) -> Result<String, UploadError> {
        let extension = extract_extension(file_name);
        let allowed = match media_type {
            MediaType::Image => &self.image_extensions,
            MediaType::Video => &self.video_extensions,
        };
        if allowed
            .iter()
            .any(|ext| ext.trim_start_matches('.').eq_ignore_ascii_case(&extension))
        {
            Ok(extension)
        } else {
            Err(UploadError::InvalidExtension {
                extension,
                media_type,
            })
        }
    }

    /// Writes the file under a content-addressed name and returns its path.
    pub async fn store(&self, data: &[u8], extension: &str) -> Result<PathBuf, UploadError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(storage_file_name(data, extension));
        if !tokio::fs::try_exists(&path).await? {
            tokio::fs::write(&path, data).await?;
            log::info!("Stored upload at {}", path.display());
        } else {
            log::debug!("Upload already present at {}", path.display());
        }
        Ok(path)
    }
}

pub fn calculate_media_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

pub fn storage_file_name(data: &[u8], extension: &str) -> String {
    format!("{}.{}", calculate_media_hash(data), extension)
}

pub fn extract_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

fn byte_limit(max_file_size_mb: u64) -> usize {
    usize::try_from(max_file_size_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
}

/// Drains a multipart payload. The part carrying a filename becomes the file, every
/// other part is read as a UTF-8 text field. Parts above the size limit are rejected
/// without buffering the rest.
pub async fn read_form(
    mut payload: Multipart,
    max_file_size_mb: u64,
) -> Result<UploadForm, UploadError> {
    let max_bytes = byte_limit(max_file_size_mb);
    let mut form = UploadForm {
        file: None,
        fields: HashMap::new(),
    };

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| UploadError::Multipart(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| UploadError::Multipart(e.to_string()))?;
            if data.len() + chunk.len() > max_bytes {
                return Err(UploadError::FileTooLarge(max_file_size_mb));
            }
            data.extend_from_slice(&chunk);
        }

        match file_name {
            Some(file_name) => form.file = Some(UploadedFile { file_name, data }),
            None => {
                let value = String::from_utf8(data)
                    .map_err(|_| UploadError::Multipart(format!("field '{}' is not UTF-8", name)))?;
                form.fields.insert(name, value.trim().to_string());
            }
        }
    }

    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(dir: &Path) -> UploadPolicy {
        UploadPolicy::from_config(&DetectorConfig {
            uploads: crate::config::UploadConfig {
                dir: dir.to_path_buf(),
                max_file_size_mb: 1,
            },
            ..Default::default()
        })
    }

    #[test]
    fn extension_must_match_media_type() {
        let policy = policy(Path::new("uploads"));
        assert_eq!(
            policy.validate_extension("Face.JPG", MediaType::Image).unwrap(),
            "jpg"
        );
        assert_eq!(policy.validate_extension("clip.mov", MediaType::Video).unwrap(), "mov");

        let err = policy
            .validate_extension("clip.mp4", MediaType::Image)
            .unwrap_err();
        assert_eq!(err.to_string(), "File extension 'mp4' not allowed for image files");
        assert!(policy.validate_extension("noextension", MediaType::Video).is_err());
    }

    #[test]
    fn storage_names_are_content_addressed() {
        let a = storage_file_name(b"same bytes", "png");
        let b = storage_file_name(b"same bytes", "png");
        let c = storage_file_name(b"other bytes", "png");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.ends_with(".png"));
        assert_eq!(a.len(), 64 + 4);
    }

    #[test]
    fn byte_limit_saturates() {
        assert_eq!(byte_limit(1), 1024 * 1024);
        assert_eq!(byte_limit(u64::MAX), usize::MAX);
    }

    #[tokio::test]
    async fn store_writes_once_per_content() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(&dir.path().join("nested"));

        let first = policy.store(b"pixels", "png").await.unwrap();
        let second = policy.store(b"pixels", "png").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read(&first).unwrap(), b"pixels");
    }
}
