use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Record store settings
    pub database: DatabaseConfig,

    /// Artifact storage layout
    pub storage: StorageConfig,

    /// Archive discovery endpoints
    pub discovery: DiscoveryConfig,

    /// Stream-URL resolution settings
    pub resolution: ResolutionConfig,

    /// Download behavior
    pub download: DownloadConfig,

    /// Pipeline concurrency and recovery
    pub pipeline: PipelineConfig,

    /// Transcription provider selection
    pub transcription: TranscriptionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/gavel.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root under which videos/, audio/, and transcripts/ live
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data"),
        }
    }
}

impl StorageConfig {
    pub fn videos_dir(&self) -> PathBuf {
        self.root.join("videos")
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("audio")
    }

    pub fn transcripts_dir(&self) -> PathBuf {
        self.root.join("transcripts")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// House archive listing page
    pub house_archive_url: String,

    /// Base URL the House player links are relative to
    pub house_base_url: String,

    /// Senate recent-videos API endpoint
    pub senate_api_url: String,

    /// Base URL for Senate player pages (the opaque id is appended)
    pub senate_player_base_url: String,

    /// Default lookback window in days when no explicit dates are given
    pub lookback_days: i64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            house_archive_url: "https://house.mi.gov/VideoArchive".to_string(),
            house_base_url: "https://house.mi.gov".to_string(),
            senate_api_url:
                "https://2kbyogxrg4.execute-api.us-west-2.amazonaws.com/61b3adc8124d7d000891ca5c/home/recent"
                    .to_string(),
            senate_player_base_url: "https://cloud.castus.tv/vod/misenate/video".to_string(),
            lookback_days: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Direct file storage the House archive serves videos from
    pub house_file_base_url: String,

    /// CDN output pattern base for Senate HLS manifests
    pub senate_cdn_base_url: String,

    /// Playback-resolution API that exchanges an id for a signed URL
    pub senate_playback_api_url: String,

    /// Organization id the playback API expects
    pub senate_org_id: String,

    /// Referer sent alongside playback API calls
    pub senate_player_referer: String,

    pub sniffer: SnifferConfig,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            house_file_base_url: "https://www.house.mi.gov/ArchiveVideoFiles".to_string(),
            senate_cdn_base_url: "https://dlttx48mxf9m3.cloudfront.net/outputs".to_string(),
            senate_playback_api_url:
                "https://imd0mxanj2.execute-api.us-west-2.amazonaws.com/upload/get".to_string(),
            senate_org_id: "61b3adc8124d7d000891ca5c".to_string(),
            senate_player_referer: "https://cloud.castus.tv/vod/misenate/".to_string(),
            sniffer: SnifferConfig::default(),
        }
    }
}

/// Headless-browser manifest sniffing. Each invocation holds a full browser
/// process, so concurrency stays small and every run has a hard timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnifferConfig {
    /// External sniffer command; the player URL is appended as the last
    /// argument and observed network URLs are read line-by-line from stdout.
    /// None disables browser-based resolution entirely.
    pub command: Option<Vec<String>>,

    /// One-second polls to wait for a manifest URL after triggering playback
    pub poll_seconds: u64,

    /// Hard per-invocation timeout
    pub timeout_seconds: u64,

    /// Maximum concurrent browser processes
    pub concurrency: usize,
}

impl Default for SnifferConfig {
    fn default() -> Self {
        Self {
            command: None,
            poll_seconds: 10,
            timeout_seconds: 60,
            concurrency: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Inline retry attempts for transient network failures
    pub max_retries: u32,

    /// Per-transfer timeout in seconds
    pub timeout_seconds: u64,

    /// Payloads smaller than this are treated as corrupt, not retried
    pub min_file_bytes: u64,

    /// External downloader for manifest/segmented formats
    pub yt_dlp_path: String,

    /// Parallel fragment connections for segmented downloads
    pub concurrent_fragments: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_seconds: 300,
            min_file_bytes: 1000,
            yt_dlp_path: "yt-dlp".to_string(),
            concurrent_fragments: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent download workers
    pub download_concurrency: usize,

    /// Concurrent transcription workers
    pub transcription_concurrency: usize,

    /// Minutes after which an in-progress record is considered abandoned
    pub stale_after_minutes: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            download_concurrency: 4,
            transcription_concurrency: 1,
            stale_after_minutes: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// One of "local", "openai", "aws"
    pub provider: String,

    /// whisper.cpp CLI binary for the local provider
    pub whisper_cli_path: String,

    /// GGML model file for the local provider
    pub whisper_model_path: PathBuf,

    pub openai_api_key: Option<String>,
    pub openai_model: String,

    pub aws: AwsTranscriptionConfig,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            whisper_cli_path: "whisper-cli".to_string(),
            whisper_model_path: PathBuf::from("./models/ggml-base.bin"),
            openai_api_key: None,
            openai_model: "whisper-1".to_string(),
            aws: AwsTranscriptionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsTranscriptionConfig {
    pub region: String,

    /// S3 bucket for staging audio before transcription jobs
    pub s3_bucket: String,

    pub s3_key_prefix: Option<String>,

    /// Language code; None enables automatic detection
    pub language: Option<String>,
}

impl Default for AwsTranscriptionConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            s3_bucket: String::new(),
            s3_key_prefix: Some("gavel/".to_string()),
            language: Some("en-US".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let mut config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        } else {
            let mut config = Self::default();
            config.save().await?;
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("gavel").join("config.yaml"))
    }

    /// Environment variables override the file for deployment
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Ok(root) = std::env::var("STORAGE_PATH") {
            self.storage.root = PathBuf::from(root);
        }
        if let Ok(provider) = std::env::var("TRANSCRIPTION_PROVIDER") {
            self.transcription.provider = provider;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.transcription.openai_api_key = Some(key);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self.transcription.provider.as_str() {
            "local" | "openai" | "aws" => {}
            other => anyhow::bail!("unknown transcription provider: {}", other),
        }

        if self.transcription.provider == "aws" && self.transcription.aws.s3_bucket.is_empty() {
            anyhow::bail!("AWS S3 bucket must be configured for the aws provider");
        }

        if self.pipeline.download_concurrency == 0 || self.pipeline.transcription_concurrency == 0
        {
            anyhow::bail!("pipeline concurrency must be at least 1");
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Database: {}", self.database.path.display());
        println!("  Storage root: {}", self.storage.root.display());
        println!("  House archive: {}", self.discovery.house_archive_url);
        println!("  Senate API: {}", self.discovery.senate_api_url);
        println!("  Transcription provider: {}", self.transcription.provider);
        println!(
            "  Browser sniffing: {}",
            if self.resolution.sniffer.command.is_some() {
                "enabled"
            } else {
                "disabled"
            }
        );
    }
}
