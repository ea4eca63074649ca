use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub mod aws;
pub mod local;
pub mod openai;

pub use aws::AwsTranscribeProvider;
pub use local::WhisperCliProvider;
pub use openai::OpenAiProvider;

use crate::config::TranscriptionConfig;
use crate::Result;

/// One timed span of transcribed speech
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start time in seconds
    pub start_time: f64,

    /// End time in seconds
    pub end_time: f64,

    /// Segment text
    pub text: String,
}

/// What a provider hands back for one audio file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionOutput {
    /// The full transcribed text
    pub text: String,

    /// Timed segments when the provider produces them
    pub segments: Option<Vec<TranscriptSegment>>,

    /// Which provider produced this attempt
    pub provider_name: String,
}

/// Speech-to-text providers are interchangeable behind this one contract
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transcribe(&self, audio_path: &Path) -> Result<TranscriptionOutput>;
}

/// Build the configured provider
pub async fn provider_from_config(
    config: &TranscriptionConfig,
) -> Result<Arc<dyn TranscriptionProvider>> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(WhisperCliProvider::new(
            config.whisper_cli_path.clone(),
            config.whisper_model_path.clone(),
        ))),
        "openai" => {
            let api_key = config
                .openai_api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("openai provider requires an API key"))?;
            Ok(Arc::new(OpenAiProvider::new(
                api_key,
                config.openai_model.clone(),
            )))
        }
        "aws" => Ok(Arc::new(AwsTranscribeProvider::new(&config.aws).await?)),
        other => anyhow::bail!("unknown transcription provider: {}", other),
    }
}

/// Serialize segments for the transcript registry
pub fn segments_to_json(segments: &Option<Vec<TranscriptSegment>>) -> Option<String> {
    segments
        .as_ref()
        .and_then(|segments| serde_json::to_string(segments).ok())
}
