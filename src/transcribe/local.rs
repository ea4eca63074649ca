use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::{TranscriptSegment, TranscriptionOutput, TranscriptionProvider};
use crate::{GavelError, Result};

/// Local whisper.cpp CLI provider.
///
/// Runs the whisper-cli binary against the extracted audio and parses the
/// JSON it writes next to the output base.
pub struct WhisperCliProvider {
    whisper_cli_path: String,
    model_path: PathBuf,
}

impl WhisperCliProvider {
    pub fn new(whisper_cli_path: String, model_path: PathBuf) -> Self {
        Self {
            whisper_cli_path,
            model_path,
        }
    }
}

#[async_trait]
impl TranscriptionProvider for WhisperCliProvider {
    fn name(&self) -> &'static str {
        "local_whisper"
    }

    async fn transcribe(&self, audio_path: &Path) -> Result<TranscriptionOutput> {
        if !audio_path.exists() {
            return Err(GavelError::InvalidPayload(format!(
                "audio file not found: {}",
                audio_path.display()
            ))
            .into());
        }
        if !self.model_path.exists() {
            return Err(GavelError::Config(format!(
                "whisper model not found: {}",
                self.model_path.display()
            ))
            .into());
        }

        let output_base = audio_path.with_extension("");
        tracing::info!("running whisper-cli on {}", audio_path.display());

        let output = Command::new(&self.whisper_cli_path)
            .args([
                "-m",
                &self.model_path.to_string_lossy(),
                "-f",
                &audio_path.to_string_lossy(),
                "-oj",
                "-of",
                &output_base.to_string_lossy(),
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| GavelError::Subprocess(format!("failed to spawn whisper-cli: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GavelError::Subprocess(format!(
                "whisper-cli failed: {}",
                stderr.lines().last().unwrap_or("unknown error")
            ))
            .into());
        }

        let json_path = output_base.with_extension("json");
        let json = fs_err::read_to_string(&json_path)?;
        let result = parse_whisper_json(&json)?;

        // The registry keeps the content; the sidecar JSON is scratch
        let _ = fs_err::remove_file(&json_path);

        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    transcription: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    offsets: Option<WhisperOffsets>,
    text: String,
}

#[derive(Debug, Deserialize)]
struct WhisperOffsets {
    from: i64,
    to: i64,
}

/// Parse whisper.cpp's -oj output into the provider contract
pub(crate) fn parse_whisper_json(json: &str) -> Result<TranscriptionOutput> {
    let parsed: WhisperOutput = serde_json::from_str(json)
        .map_err(|e| GavelError::Subprocess(format!("whisper output unparseable: {}", e)))?;

    let mut segments = Vec::new();
    let mut text = String::new();

    for segment in &parsed.transcription {
        let segment_text = segment.text.trim();
        if segment_text.is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(segment_text);

        if let Some(offsets) = &segment.offsets {
            segments.push(TranscriptSegment {
                // whisper.cpp reports milliseconds
                start_time: offsets.from as f64 / 1000.0,
                end_time: offsets.to as f64 / 1000.0,
                text: segment_text.to_string(),
            });
        }
    }

    Ok(TranscriptionOutput {
        text,
        segments: if segments.is_empty() {
            None
        } else {
            Some(segments)
        },
        provider_name: "local_whisper".to_string(),
    })
}
