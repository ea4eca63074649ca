use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub mod audio;
pub mod download;

pub use audio::{AudioExtractor, FfmpegExtractor};
pub use download::{
    Downloader, FetchOutcome, HttpDownloader, SegmentedDownloader, StrategyDownloader,
};

use crate::resolver::{Resolution, ResolveTarget, StreamResolver};
use crate::store::{
    AudioStage, DownloadStage, NewTranscript, Source, StageUpdate, TranscriptionStage,
    VideoRecord, VideoStore,
};
use crate::transcribe::{segments_to_json, TranscriptionProvider};
use crate::utils::{looks_like_html, sanitize_filename};
use crate::{GavelError, Result};

/// Tunables for one pipeline instance
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub videos_dir: PathBuf,
    pub audio_dir: PathBuf,
    pub transcripts_dir: PathBuf,
    /// Inline attempts for transient transfer failures
    pub max_retries: u32,
    /// Smaller payloads are treated as corrupt downloads
    pub min_file_bytes: u64,
}

impl PipelineSettings {
    pub fn from_config(config: &crate::Config) -> Self {
        Self {
            videos_dir: config.storage.videos_dir(),
            audio_dir: config.storage.audio_dir(),
            transcripts_dir: config.storage.transcripts_dir(),
            max_retries: config.download.max_retries.max(1),
            min_file_bytes: config.download.min_file_bytes,
        }
    }
}

/// What happened to one video in one pipeline pass
#[derive(Debug, Clone)]
pub struct VideoOutcome {
    pub video_id: String,
    pub source: Source,
    /// Download stage ended satisfied (freshly or previously)
    pub downloaded: bool,
    /// Transcription stage ended completed
    pub transcribed: bool,
    /// The persisted failure reason, when a stage failed
    pub failure: Option<String>,
}

impl VideoOutcome {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Outcome of one stage attempt: done with its artifact, or a soft failure
/// already persisted to the record. Hard errors (store failures, invariant
/// violations) travel separately as `Err`.
#[derive(Debug)]
enum StageResult<T> {
    Done(T),
    Failed(String),
}

/// The acquisition state machine.
///
/// Advances one record at a time through download -> audio extraction ->
/// transcription, persisting every transition through the record store before
/// and after the work. One video's failure is recorded and never propagates
/// past the pipeline boundary; invariant violations do.
pub struct AcquisitionPipeline {
    store: Arc<VideoStore>,
    resolvers: HashMap<Source, Arc<dyn StreamResolver>>,
    downloader: Arc<dyn Downloader>,
    extractor: Arc<dyn AudioExtractor>,
    provider: Arc<dyn TranscriptionProvider>,
    settings: PipelineSettings,
}

impl AcquisitionPipeline {
    pub fn new(
        store: Arc<VideoStore>,
        resolvers: HashMap<Source, Arc<dyn StreamResolver>>,
        downloader: Arc<dyn Downloader>,
        extractor: Arc<dyn AudioExtractor>,
        provider: Arc<dyn TranscriptionProvider>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            resolvers,
            downloader,
            extractor,
            provider,
            settings,
        }
    }

    /// Run every outstanding stage for one record.
    ///
    /// Re-entry is idempotent: satisfied stages are skipped, and a completed
    /// terminal stage is never redone outside the recovery sweeper's explicit
    /// resets.
    pub async fn process_video(&self, video_id: &str, source: Source) -> Result<VideoOutcome> {
        let outcome = self.run_media_stages(video_id, source).await?;
        if !outcome.succeeded() {
            return Ok(outcome);
        }
        self.run_transcription(video_id, source).await
    }

    /// Download and audio extraction, the media-heavy half of the pipeline.
    /// Gate this behind the download pool when dispatching concurrently.
    pub async fn run_media_stages(&self, video_id: &str, source: Source) -> Result<VideoOutcome> {
        // Correlation id spanning this video's whole chain in the logs
        let trace_id = uuid::Uuid::new_v4().to_string()[..8].to_string();

        let record = self
            .store
            .get(video_id, source)?
            .ok_or_else(|| GavelError::RecordNotFound(format!("{} ({})", video_id, source)))?;

        tracing::info!(trace = %trace_id, "processing {} ({})", video_id, source);

        let mut outcome = VideoOutcome {
            video_id: video_id.to_string(),
            source,
            downloaded: false,
            transcribed: false,
            failure: None,
        };

        let download_path = match self.ensure_downloaded(&record, &trace_id).await? {
            StageResult::Done(path) => {
                outcome.downloaded = true;
                path
            }
            StageResult::Failed(reason) => {
                outcome.failure = Some(reason);
                return Ok(outcome);
            }
        };

        match self.ensure_audio(&record, &download_path, &trace_id).await? {
            StageResult::Done(_) => {}
            StageResult::Failed(reason) => outcome.failure = Some(reason),
        }

        Ok(outcome)
    }

    /// Transcription only; requires the audio stage to already be satisfied.
    /// Used directly for the sweeper's cheap retry path.
    pub async fn run_transcription(&self, video_id: &str, source: Source) -> Result<VideoOutcome> {
        let trace_id = uuid::Uuid::new_v4().to_string()[..8].to_string();

        let record = self
            .store
            .get(video_id, source)?
            .ok_or_else(|| GavelError::RecordNotFound(format!("{} ({})", video_id, source)))?;

        let mut outcome = VideoOutcome {
            video_id: video_id.to_string(),
            source,
            downloaded: record.download_stage == DownloadStage::Downloaded,
            transcribed: false,
            failure: None,
        };

        let audio_path = record
            .audio_path
            .clone()
            .map(PathBuf::from)
            .unwrap_or_default();

        match self.ensure_transcribed(&record, &audio_path, &trace_id).await? {
            StageResult::Done(()) => outcome.transcribed = true,
            StageResult::Failed(reason) => outcome.failure = Some(reason),
        }

        Ok(outcome)
    }

    /// Download stage: resolve a fresh stream URL, transfer, validate.
    async fn ensure_downloaded(
        &self,
        record: &VideoRecord,
        trace_id: &str,
    ) -> Result<StageResult<PathBuf>> {
        if record.download_stage == DownloadStage::Downloaded {
            if let Some(path) = &record.download_path {
                if Path::new(path).exists() {
                    tracing::debug!(trace = %trace_id, "already downloaded: {}", path);
                    return Ok(StageResult::Done(PathBuf::from(path)));
                }
            }
            // Terminal success but the artifact is gone from disk; surface as
            // a failure so the sweeper restarts the record.
            let reason = "download artifact missing from disk".to_string();
            self.mark_download_failed(record, &reason)?;
            return Ok(StageResult::Failed(reason));
        }

        // Persist the in-progress marker before any work
        self.store.update_stages(
            &record.video_id,
            record.source,
            &StageUpdate::download(DownloadStage::InProgress),
        )?;

        // Resolution runs fresh on every attempt; a cached URL is only
        // trusted within the attempt that produced it.
        let resolver = self.resolvers.get(&record.source).ok_or_else(|| {
            GavelError::Config(format!("no resolver configured for {}", record.source))
        })?;

        let stream_url = match resolver.resolve(&ResolveTarget::from(record)).await {
            Ok(Resolution::Resolved(url)) => {
                self.store
                    .update_stream_url(&record.video_id, record.source, &url)?;
                url
            }
            Ok(Resolution::Unresolved) => {
                let reason = "resolution chain exhausted, will retry on a later pass".to_string();
                tracing::warn!(trace = %trace_id, "{}: {}", record.video_id, reason);
                self.mark_download_failed(record, &reason)?;
                return Ok(StageResult::Failed(reason));
            }
            Err(e) => {
                let reason = format!("resolution failed: {:#}", e);
                tracing::warn!(trace = %trace_id, "{}: {}", record.video_id, reason);
                self.mark_download_failed(record, &reason)?;
                return Ok(StageResult::Failed(reason));
            }
        };

        let dest = self
            .settings
            .videos_dir
            .join(sanitize_filename(&record.filename));

        let mut attempt = 1u32;
        loop {
            match self.downloader.fetch(&stream_url, &dest).await {
                Ok(fetched) => {
                    // Wrong-URL payloads are not retried inline; the next
                    // pass re-resolves instead of replaying a bad URL.
                    if let Err(reason) =
                        self.validate_payload(&dest, fetched.bytes_transferred)
                    {
                        tracing::warn!(trace = %trace_id, "{}: {}", record.video_id, reason);
                        self.mark_download_failed(record, &reason)?;
                        return Ok(StageResult::Failed(reason));
                    }

                    self.store.update_stages(
                        &record.video_id,
                        record.source,
                        &StageUpdate::download(DownloadStage::Downloaded)
                            .with_download_path(dest.to_string_lossy().to_string()),
                    )?;
                    tracing::info!(
                        trace = %trace_id,
                        "downloaded {} ({} bytes)",
                        record.video_id,
                        fetched.bytes_transferred
                    );
                    return Ok(StageResult::Done(dest));
                }
                Err(e) if GavelError::is_transient(&e) && attempt < self.settings.max_retries => {
                    let delay = 2u64.pow(attempt);
                    tracing::warn!(
                        trace = %trace_id,
                        "download attempt {} failed, retrying in {}s: {:#}",
                        attempt,
                        delay,
                        e
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    attempt += 1;
                }
                Err(e) => {
                    let reason = format!("download failed after {} attempt(s): {:#}", attempt, e);
                    tracing::warn!(trace = %trace_id, "{}: {}", record.video_id, reason);
                    self.mark_download_failed(record, &reason)?;
                    return Ok(StageResult::Failed(reason));
                }
            }
        }
    }

    fn mark_download_failed(&self, record: &VideoRecord, reason: &str) -> Result<()> {
        self.store.update_stages(
            &record.video_id,
            record.source,
            &StageUpdate::download(DownloadStage::Failed).with_error(reason),
        )
    }

    /// Reject payloads that are an HTML error page or implausibly small.
    /// Both mean the URL was wrong, not that the transfer flaked.
    fn validate_payload(&self, path: &Path, bytes_transferred: u64) -> std::result::Result<(), String> {
        let mut leading = Vec::with_capacity(1024);
        let read_ok = fs_err::File::open(path)
            .map(|file| file.take(1024).read_to_end(&mut leading))
            .is_ok();

        if !read_ok {
            let _ = fs_err::remove_file(path);
            return Err("downloaded file unreadable".to_string());
        }
        if looks_like_html(&leading) {
            let _ = fs_err::remove_file(path);
            return Err("downloaded an HTML document instead of a video payload".to_string());
        }
        if bytes_transferred < self.settings.min_file_bytes {
            let _ = fs_err::remove_file(path);
            return Err(format!(
                "downloaded file too small ({} bytes)",
                bytes_transferred
            ));
        }
        Ok(())
    }

    /// Audio stage; only entered on a completed download.
    async fn ensure_audio(
        &self,
        record: &VideoRecord,
        download_path: &Path,
        trace_id: &str,
    ) -> Result<StageResult<PathBuf>> {
        let fresh = self
            .store
            .get(&record.video_id, record.source)?
            .ok_or_else(|| GavelError::RecordNotFound(record.video_id.clone()))?;

        // Entry guard: this must never fire given process_video's ordering,
        // and is loud rather than silently skipped if it somehow does.
        if fresh.download_stage != DownloadStage::Downloaded {
            return Err(GavelError::StagePrecondition(format!(
                "audio extraction for {} requires a completed download (found {})",
                record.video_id,
                fresh.download_stage.as_str()
            ))
            .into());
        }

        if fresh.audio_stage == AudioStage::Extracted {
            if let Some(path) = &fresh.audio_path {
                if Path::new(path).exists() {
                    tracing::debug!(trace = %trace_id, "audio already extracted: {}", path);
                    return Ok(StageResult::Done(PathBuf::from(path)));
                }
            }
            // Artifact lost but the download is still good; re-extract.
        }

        self.store.update_stages(
            &record.video_id,
            record.source,
            &StageUpdate::audio(AudioStage::Extracting),
        )?;

        match self
            .extractor
            .extract(download_path, &self.settings.audio_dir)
            .await
        {
            Ok(audio_path) => {
                self.store.update_stages(
                    &record.video_id,
                    record.source,
                    &StageUpdate::audio(AudioStage::Extracted)
                        .with_audio_path(audio_path.to_string_lossy().to_string()),
                )?;
                tracing::info!(trace = %trace_id, "extracted audio for {}", record.video_id);
                Ok(StageResult::Done(audio_path))
            }
            Err(e) => {
                // The download stays valid and reusable
                let reason = format!("audio extraction failed: {:#}", e);
                tracing::warn!(trace = %trace_id, "{}: {}", record.video_id, reason);
                self.store.update_stages(
                    &record.video_id,
                    record.source,
                    &StageUpdate::audio(AudioStage::Failed).with_error(&reason),
                )?;
                Ok(StageResult::Failed(reason))
            }
        }
    }

    /// Transcription stage; only entered on extracted audio.
    async fn ensure_transcribed(
        &self,
        record: &VideoRecord,
        audio_path: &Path,
        trace_id: &str,
    ) -> Result<StageResult<()>> {
        let fresh = self
            .store
            .get(&record.video_id, record.source)?
            .ok_or_else(|| GavelError::RecordNotFound(record.video_id.clone()))?;

        if fresh.audio_stage != AudioStage::Extracted {
            return Err(GavelError::StagePrecondition(format!(
                "transcription for {} requires extracted audio (found {})",
                record.video_id,
                fresh.audio_stage.as_str()
            ))
            .into());
        }

        // A completed terminal stage is never silently overwritten
        if fresh.transcription_stage == TranscriptionStage::Completed {
            tracing::debug!(trace = %trace_id, "already transcribed: {}", record.video_id);
            return Ok(StageResult::Done(()));
        }

        self.store.update_stages(
            &record.video_id,
            record.source,
            &StageUpdate::transcription(TranscriptionStage::InProgress),
        )?;

        match self.provider.transcribe(audio_path).await {
            Ok(output) => {
                fs_err::create_dir_all(&self.settings.transcripts_dir)?;
                let text_path = self
                    .settings
                    .transcripts_dir
                    .join(format!("{}.txt", sanitize_filename(&record.video_id)));
                fs_err::write(&text_path, &output.text)?;

                self.store.add_transcript(&NewTranscript {
                    video_id: record.video_id.clone(),
                    source: record.source,
                    provider: output.provider_name.clone(),
                    content: output.text,
                    segments_json: segments_to_json(&output.segments),
                    text_path: Some(text_path.to_string_lossy().to_string()),
                })?;
                self.store.update_stages(
                    &record.video_id,
                    record.source,
                    &StageUpdate::transcription(TranscriptionStage::Completed),
                )?;
                tracing::info!(trace = %trace_id, "transcription complete for {}", record.video_id);
                Ok(StageResult::Done(()))
            }
            Err(e) => {
                // The audio artifact is retained for reprocessing without
                // another download or extraction
                let reason = format!("transcription failed: {:#}", e);
                tracing::warn!(trace = %trace_id, "{}: {}", record.video_id, reason);
                self.store.update_stages(
                    &record.video_id,
                    record.source,
                    &StageUpdate::transcription(TranscriptionStage::Failed).with_error(&reason),
                )?;
                Ok(StageResult::Failed(reason))
            }
        }
    }
}
