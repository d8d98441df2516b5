use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;

use super::InferenceError;

/// Frames pulled from a video, kept alive as long as the temp dir is.
pub struct ExtractedFrames {
    pub frames: Vec<PathBuf>,
    _dir: TempDir,
}

/// Decodes up to `max_frames` leading frames of `video_path` into PNGs scaled to
/// `size`×`size`, using the `ffmpeg` binary on PATH.
pub async fn extract_frames(
    video_path: &Path,
    max_frames: usize,
    size: u32,
) -> Result<ExtractedFrames, InferenceError> {
    let dir = tempfile::Builder::new()
        .prefix("detector_frames_")
        .tempdir()
        .map_err(|e| InferenceError::Preprocessing(format!("cannot create frame dir: {}", e)))?;
    let pattern = dir.path().join("frame_%04d.png");

    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
        .arg("-i")
        .arg(video_path)
        .args(["-an", "-sn"])
        .args(["-frames:v", &max_frames.to_string()])
        .args(["-vf", &format!("scale={}:{}", size, size)])
        .arg("-y")
        .arg(&pattern)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| InferenceError::Preprocessing(format!("failed to spawn ffmpeg: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(InferenceError::Preprocessing(format!(
            "ffmpeg failed on {}: {}",
            video_path.display(),
            stderr.trim()
        )));
    }

    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir.path())
        .map_err(|e| InferenceError::Preprocessing(format!("cannot list frames: {}", e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "png"))
        .collect();
    frames.sort();

    if frames.is_empty() {
        return Err(InferenceError::Preprocessing(format!(
            "no frames decoded from {}",
            video_path.display()
        )));
    }
    log::debug!("Extracted {} frames from {}", frames.len(), video_path.display());

    Ok(ExtractedFrames { frames, _dir: dir })
}
