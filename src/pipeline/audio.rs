use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::{GavelError, Result};

/// Produces a speech-recognition-ready audio file from a downloaded video
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    async fn extract(&self, video_path: &Path, audio_dir: &Path) -> Result<PathBuf>;
}

/// ffmpeg-based extraction: mono, 16 kHz, 16-bit PCM WAV
pub struct FfmpegExtractor {
    ffmpeg_path: String,
}

impl FfmpegExtractor {
    pub fn new() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }

    pub fn with_path(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

impl Default for FfmpegExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioExtractor for FfmpegExtractor {
    async fn extract(&self, video_path: &Path, audio_dir: &Path) -> Result<PathBuf> {
        if !video_path.exists() {
            return Err(GavelError::InvalidPayload(format!(
                "video file not found: {}",
                video_path.display()
            ))
            .into());
        }

        fs_err::create_dir_all(audio_dir)?;
        let stem = video_path
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let audio_path = audio_dir.join(format!("{}.wav", stem));

        tracing::info!(
            "extracting audio: {} -> {}",
            video_path.display(),
            audio_path.display()
        );

        let output = Command::new(&self.ffmpeg_path)
            .args([
                "-i",
                &video_path.to_string_lossy(),
                "-vn",
                "-acodec",
                "pcm_s16le",
                "-ar",
                "16000",
                "-ac",
                "1",
                &audio_path.to_string_lossy(),
                "-y",
            ])
            .output()
            .await
            .map_err(|e| GavelError::Subprocess(format!("failed to run ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let _ = tokio::fs::remove_file(&audio_path).await;
            return Err(GavelError::Subprocess(format!(
                "ffmpeg failed: {}",
                stderr.lines().last().unwrap_or("unknown error")
            ))
            .into());
        }

        Ok(audio_path)
    }
}
