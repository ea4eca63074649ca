use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use super::{TranscriptSegment, TranscriptionOutput, TranscriptionProvider};
use crate::{GavelError, Result};

const API_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Hosted speech-to-text over the OpenAI transcription endpoint
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    api_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(600))
                .build()
                .unwrap_or_default(),
            api_key,
            model,
            api_url: API_URL.to_string(),
        }
    }

}

#[async_trait]
impl TranscriptionProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai_whisper"
    }

    async fn transcribe(&self, audio_path: &Path) -> Result<TranscriptionOutput> {
        let audio = fs_err::read(audio_path)?;
        let filename = audio_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let form = multipart::Form::new()
            .part(
                "file",
                multipart::Part::bytes(audio)
                    .file_name(filename)
                    .mime_str("audio/wav")
                    .map_err(|e| GavelError::Config(format!("bad mime type: {}", e)))?,
            )
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");

        tracing::info!("uploading {} for hosted transcription", audio_path.display());

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GavelError::Timeout(format!("transcription request timed out: {}", e))
                } else {
                    GavelError::Network(format!("transcription request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GavelError::Network(format!(
                "transcription API returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            ))
            .into());
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GavelError::Network(format!("transcription body unreadable: {}", e)))?;

        parse_response(&body)
    }
}

/// Parse a verbose_json transcription response
pub(crate) fn parse_response(body: &Value) -> Result<TranscriptionOutput> {
    let text = body["text"]
        .as_str()
        .ok_or_else(|| GavelError::Network("transcription response missing text".to_string()))?
        .to_string();

    let segments = body["segments"].as_array().map(|segments| {
        segments
            .iter()
            .filter_map(|segment| {
                Some(TranscriptSegment {
                    start_time: segment["start"].as_f64()?,
                    end_time: segment["end"].as_f64()?,
                    text: segment["text"].as_str()?.trim().to_string(),
                })
            })
            .collect::<Vec<_>>()
    });

    Ok(TranscriptionOutput {
        text,
        segments: segments.filter(|s| !s.is_empty()),
        provider_name: "openai_whisper".to_string(),
    })
}
