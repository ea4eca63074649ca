use anyhow::Context;
use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_transcribe::types::{Media, MediaFormat, TranscriptionJob, TranscriptionJobStatus};
use aws_sdk_transcribe::Client as TranscribeClient;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use super::{TranscriptSegment, TranscriptionOutput, TranscriptionProvider};
use crate::config::AwsTranscriptionConfig;
use crate::{GavelError, Result};

/// Cloud speech-to-text via AWS Transcribe.
///
/// Audio is staged in S3, a transcription job runs against it, and the
/// staging object is removed once the transcript JSON has been fetched.
pub struct AwsTranscribeProvider {
    s3_client: S3Client,
    transcribe_client: TranscribeClient,
    bucket: String,
    key_prefix: Option<String>,
    language: Option<String>,
}

impl AwsTranscribeProvider {
    pub async fn new(config: &AwsTranscriptionConfig) -> Result<Self> {
        if config.s3_bucket.is_empty() {
            return Err(GavelError::Config(
                "aws transcription requires an S3 bucket".to_string(),
            )
            .into());
        }

        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        Ok(Self {
            s3_client: S3Client::new(&aws_config),
            transcribe_client: TranscribeClient::new(&aws_config),
            bucket: config.s3_bucket.clone(),
            key_prefix: config.s3_key_prefix.clone(),
            language: config.language.clone(),
        })
    }

    /// Stage the audio file in S3 for the transcription job
    async fn upload_audio(&self, audio_path: &Path) -> Result<String> {
        let key = format!(
            "{}audio_{}_{}.wav",
            self.key_prefix.as_deref().unwrap_or(""),
            Uuid::new_v4(),
            chrono::Utc::now().format("%Y%m%d_%H%M%S"),
        );

        tracing::info!("uploading audio to s3://{}/{}", self.bucket, key);
        let content = fs_err::read(audio_path)?;

        self.s3_client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(content.into())
            .content_type("audio/wav")
            .send()
            .await
            .context("Failed to upload audio to S3")?;

        Ok(key)
    }

    async fn start_job(&self, s3_key: &str) -> Result<String> {
        let job_name = format!("gavel_{}", Uuid::new_v4());
        let media_uri = format!("s3://{}/{}", self.bucket, s3_key);

        tracing::info!("starting transcription job: {}", job_name);

        let media = Media::builder().media_file_uri(media_uri).build();

        let mut job_builder = self
            .transcribe_client
            .start_transcription_job()
            .transcription_job_name(&job_name)
            .media_format(MediaFormat::Wav)
            .media_sample_rate_hertz(16000)
            .media(media);

        if let Some(language) = &self.language {
            job_builder = job_builder.language_code(language.parse()?);
        } else {
            job_builder = job_builder.identify_language(true);
        }

        job_builder
            .send()
            .await
            .context("Failed to start transcription job")?;

        Ok(job_name)
    }

    async fn get_job(&self, job_name: &str) -> Result<TranscriptionJob> {
        let response = self
            .transcribe_client
            .get_transcription_job()
            .transcription_job_name(job_name)
            .send()
            .await
            .context("Failed to get transcription job status")?;

        response
            .transcription_job()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("transcription job not found"))
    }

    /// Poll until the job finishes, backing off up to 30 seconds per check
    async fn wait_for_job(&self, job_name: &str) -> Result<TranscriptionJob> {
        let mut check_count: u64 = 0;

        loop {
            check_count += 1;
            let job = self.get_job(job_name).await?;

            match job.transcription_job_status() {
                Some(TranscriptionJobStatus::InProgress) | Some(TranscriptionJobStatus::Queued) => {
                    let wait_time = std::cmp::min(5 + (check_count - 1) * 2, 30);
                    sleep(Duration::from_secs(wait_time)).await;
                }
                Some(TranscriptionJobStatus::Completed) => return Ok(job),
                Some(TranscriptionJobStatus::Failed) => {
                    let failure_reason = job.failure_reason().unwrap_or("Unknown error");
                    anyhow::bail!("transcription job failed: {}", failure_reason);
                }
                _ => anyhow::bail!("unexpected transcription job status"),
            }
        }
    }

    async fn download_transcript(&self, uri: &str) -> Result<String> {
        let response = reqwest::get(uri).await.context("Failed to download transcript")?;

        if !response.status().is_success() {
            anyhow::bail!("failed to download transcript: HTTP {}", response.status());
        }

        Ok(response
            .text()
            .await
            .context("Failed to read transcript content")?)
    }

    async fn cleanup_staging(&self, s3_key: &str) {
        tracing::debug!("removing staging object s3://{}/{}", self.bucket, s3_key);
        if let Err(e) = self
            .s3_client
            .delete_object()
            .bucket(&self.bucket)
            .key(s3_key)
            .send()
            .await
        {
            tracing::warn!("failed to clean up staging object {}: {}", s3_key, e);
        }
    }
}

#[async_trait]
impl TranscriptionProvider for AwsTranscribeProvider {
    fn name(&self) -> &'static str {
        "aws_transcribe"
    }

    async fn transcribe(&self, audio_path: &Path) -> Result<TranscriptionOutput> {
        let s3_key = self.upload_audio(audio_path).await?;

        let result = async {
            let job_name = self.start_job(&s3_key).await?;
            let job = self.wait_for_job(&job_name).await?;

            let transcript_uri = job
                .transcript()
                .and_then(|t| t.transcript_file_uri())
                .ok_or_else(|| anyhow::anyhow!("no transcript URI on completed job"))?;

            let transcript_json = self.download_transcript(transcript_uri).await?;
            parse_aws_transcript(&transcript_json)
        }
        .await;

        self.cleanup_staging(&s3_key).await;
        result
    }
}

#[derive(Debug, Deserialize)]
struct AwsTranscript {
    results: TranscriptResults,
}

#[derive(Debug, Deserialize)]
struct TranscriptResults {
    transcripts: Vec<TranscriptText>,
    items: Vec<TranscriptItem>,
}

#[derive(Debug, Deserialize)]
struct TranscriptText {
    transcript: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptItem {
    start_time: Option<String>,
    end_time: Option<String>,
    #[serde(rename = "type")]
    item_type: String,
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    content: String,
}

/// Group word-level items into timed segments, splitting on silence gaps
/// over a second or sentence-ending punctuation.
pub(crate) fn parse_aws_transcript(json: &str) -> Result<TranscriptionOutput> {
    let parsed: AwsTranscript =
        serde_json::from_str(json).context("Failed to parse transcript JSON")?;

    let text = parsed
        .results
        .transcripts
        .first()
        .map(|t| t.transcript.clone())
        .unwrap_or_default();

    let mut segments: Vec<TranscriptSegment> = Vec::new();
    let mut current_text = String::new();
    let mut current_start: Option<f64> = None;
    let mut current_end: Option<f64> = None;

    let flush =
        |text: &mut String, start: &mut Option<f64>, end: &mut Option<f64>,
         segments: &mut Vec<TranscriptSegment>| {
            if let (Some(s), Some(e)) = (*start, *end) {
                if !text.is_empty() {
                    segments.push(TranscriptSegment {
                        start_time: s,
                        end_time: e,
                        text: text.trim().to_string(),
                    });
                }
            }
            text.clear();
            *start = None;
            *end = None;
        };

    for item in &parsed.results.items {
        match item.item_type.as_str() {
            "pronunciation" => {
                let start = item.start_time.as_deref().and_then(|s| s.parse::<f64>().ok());
                let end = item.end_time.as_deref().and_then(|s| s.parse::<f64>().ok());
                let Some(word) = item.alternatives.first().map(|a| a.content.as_str()) else {
                    continue;
                };

                let gap = start
                    .zip(current_end)
                    .map(|(s, e)| s - e > 1.0)
                    .unwrap_or(false);
                if gap {
                    flush(&mut current_text, &mut current_start, &mut current_end, &mut segments);
                }

                if current_start.is_none() {
                    current_start = start;
                }
                current_end = end.or(current_end);
                if !current_text.is_empty() {
                    current_text.push(' ');
                }
                current_text.push_str(word);
            }
            "punctuation" => {
                if let Some(mark) = item.alternatives.first() {
                    current_text.push_str(&mark.content);
                    if matches!(mark.content.as_str(), "." | "!" | "?") {
                        flush(
                            &mut current_text,
                            &mut current_start,
                            &mut current_end,
                            &mut segments,
                        );
                    }
                }
            }
            _ => {}
        }
    }
    flush(&mut current_text, &mut current_start, &mut current_end, &mut segments);

    Ok(TranscriptionOutput {
        text,
        segments: if segments.is_empty() {
            None
        } else {
            Some(segments)
        },
        provider_name: "aws_transcribe".to_string(),
    })
}
