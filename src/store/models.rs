use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Archive a video was discovered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    House,
    Senate,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::House => "house",
            Source::Senate => "senate",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "house" => Ok(Source::House),
            "senate" => Ok(Source::Senate),
            other => anyhow::bail!("unknown source: {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStage {
    #[default]
    Pending,
    InProgress,
    Downloaded,
    Failed,
}

impl DownloadStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Downloaded => "downloaded",
            Self::Failed => "failed",
        }
    }
}

impl From<String> for DownloadStage {
    fn from(s: String) -> Self {
        match s.as_str() {
            "in_progress" => Self::InProgress,
            "downloaded" => Self::Downloaded,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioStage {
    #[default]
    Pending,
    Extracting,
    Extracted,
    Failed,
}

impl AudioStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Extracted => "extracted",
            Self::Failed => "failed",
        }
    }
}

impl From<String> for AudioStage {
    fn from(s: String) -> Self {
        match s.as_str() {
            "extracting" => Self::Extracting,
            "extracted" => Self::Extracted,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionStage {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TranscriptionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl From<String> for TranscriptionStage {
    fn from(s: String) -> Self {
        match s.as_str() {
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Inclusive recording-date window used by discovery and record listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window covering the last `days` days up to now
    pub fn lookback_days(days: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::days(days),
            end,
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

/// Normalized metadata produced by discovery, common to both sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub video_id: String,
    pub source: Source,
    /// Source-local media filename, e.g. "HAGRI-022025.mp4"
    pub filename: String,
    /// Canonical player page or API reference; never expires
    pub origin_url: String,
    /// Resolved stream URL when discovery ran in eager mode
    pub stream_url: Option<String>,
    pub date_recorded: DateTime<Utc>,
    pub committee: Option<String>,
    pub title: Option<String>,
}

/// One row of the `videos` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub source: Source,
    pub filename: String,
    pub title: Option<String>,
    pub committee: Option<String>,
    pub origin_url: String,
    pub resolved_stream_url: Option<String>,
    pub date_recorded: DateTime<Utc>,
    pub date_discovered: DateTime<Utc>,
    pub download_stage: DownloadStage,
    pub audio_stage: AudioStage,
    pub transcription_stage: TranscriptionStage,
    pub download_path: Option<String>,
    pub audio_path: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial stage update; only `Some` fields are applied
#[derive(Debug, Clone, Default)]
pub struct StageUpdate {
    pub download_stage: Option<DownloadStage>,
    pub audio_stage: Option<AudioStage>,
    pub transcription_stage: Option<TranscriptionStage>,
    pub download_path: Option<String>,
    pub audio_path: Option<String>,
    pub last_error: Option<String>,
}

impl StageUpdate {
    pub fn download(stage: DownloadStage) -> Self {
        Self {
            download_stage: Some(stage),
            ..Default::default()
        }
    }

    pub fn audio(stage: AudioStage) -> Self {
        Self {
            audio_stage: Some(stage),
            ..Default::default()
        }
    }

    pub fn transcription(stage: TranscriptionStage) -> Self {
        Self {
            transcription_stage: Some(stage),
            ..Default::default()
        }
    }

    pub fn with_download_path(mut self, path: impl Into<String>) -> Self {
        self.download_path = Some(path.into());
        self
    }

    pub fn with_audio_path(mut self, path: impl Into<String>) -> Self {
        self.audio_path = Some(path.into());
        self
    }

    pub fn with_error(mut self, reason: impl Into<String>) -> Self {
        self.last_error = Some(reason.into());
        self
    }
}

/// Filter for [`crate::store::VideoStore::list`]
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub source: Option<Source>,
    pub download_stage: Option<DownloadStage>,
    pub transcription_stage: Option<TranscriptionStage>,
    pub window: Option<DateWindow>,
    pub limit: Option<usize>,
}

/// One row of the `transcripts` table; append-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub id: String,
    pub video_id: String,
    pub source: Source,
    pub provider: String,
    pub content: String,
    pub segments_json: Option<String>,
    pub text_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A new transcription attempt to append
#[derive(Debug, Clone)]
pub struct NewTranscript {
    pub video_id: String,
    pub source: Source,
    pub provider: String,
    pub content: String,
    pub segments_json: Option<String>,
    pub text_path: Option<String>,
}

/// A transcript search match joined with its parent video
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptHit {
    pub video_id: String,
    pub source: Source,
    pub title: Option<String>,
    pub date_recorded: DateTime<Utc>,
    pub provider: String,
    pub content: String,
}

/// High-level pipeline counters
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub downloaded: u64,
    pub transcribed: u64,
    pub failed: u64,
}
