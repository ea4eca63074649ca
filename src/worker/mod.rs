use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::pipeline::{AcquisitionPipeline, VideoOutcome};
use crate::store::{
    AudioStage, DateWindow, DownloadStage, Source, TranscriptionStage, VideoRecord, VideoStore,
};
use crate::sweeper::{RecoverySweeper, SweepReport};
use crate::Result;

/// Aggregate result of one dispatch run
#[derive(Debug, Default)]
pub struct RunSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// (video_id, source, reason) for every failure in this run
    pub failures: Vec<(String, Source, String)>,
}

impl RunSummary {
    fn absorb(&mut self, outcome: VideoOutcome) {
        self.processed += 1;
        match outcome.failure {
            None => self.succeeded += 1,
            Some(reason) => {
                self.failed += 1;
                self.failures
                    .push((outcome.video_id, outcome.source, reason));
            }
        }
    }

    fn merge(&mut self, other: RunSummary) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.failures.extend(other.failures);
    }
}

/// Dispatches per-video units of work onto stage-specific pools.
///
/// Separate download and transcription pools keep slow transcription from
/// starving fast downloads. Coordination between workers happens only
/// through the record store; the synchronous in-progress marker written
/// before dispatch guarantees at most one worker per `(video_id, source)`.
pub struct PipelineWorker {
    store: Arc<VideoStore>,
    pipeline: Arc<AcquisitionPipeline>,
    download_pool: Arc<Semaphore>,
    transcription_pool: Arc<Semaphore>,
    stale_after: Duration,
    cancel: CancellationToken,
}

impl PipelineWorker {
    pub fn new(
        store: Arc<VideoStore>,
        pipeline: Arc<AcquisitionPipeline>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            pipeline,
            download_pool: Arc::new(Semaphore::new(config.download_concurrency.max(1))),
            transcription_pool: Arc::new(Semaphore::new(config.transcription_concurrency.max(1))),
            stale_after: Duration::minutes(config.stale_after_minutes),
            cancel: CancellationToken::new(),
        }
    }

    /// Token for wiring shutdown (ctrl-c handlers, tests)
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// At most one in-flight worker may hold a record. A record already
    /// marked in-progress is claimable only once its marker has gone stale.
    fn claimable(&self, record: &VideoRecord) -> bool {
        let in_progress = record.download_stage == DownloadStage::InProgress
            || record.audio_stage == AudioStage::Extracting
            || record.transcription_stage == TranscriptionStage::InProgress;
        if !in_progress {
            return true;
        }
        record.updated_at < Utc::now() - self.stale_after
    }

    /// Process all pending downloads within a window, fully concurrently
    /// across videos while each stage pool caps its own kind of work.
    pub async fn run_window(
        &self,
        window: Option<DateWindow>,
        source: Option<Source>,
        limit: Option<usize>,
    ) -> Result<RunSummary> {
        let mut pending = self.store.list_pending_downloads(window, source)?;
        if let Some(limit) = limit {
            pending.truncate(limit);
        }

        let keys: Vec<(String, Source)> = pending
            .into_iter()
            .map(|record| (record.video_id, record.source))
            .collect();

        tracing::info!("dispatching {} pending videos", keys.len());
        Ok(self.process_batch(keys).await)
    }

    /// Dispatch a set of `(video_id, source)` units of work
    pub async fn process_batch(&self, keys: Vec<(String, Source)>) -> RunSummary {
        let mut join_set: JoinSet<Option<VideoOutcome>> = JoinSet::new();

        for (video_id, source) in keys {
            let record = match self.store.get(&video_id, source) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    tracing::warn!("skipping unknown record {} ({})", video_id, source);
                    continue;
                }
                Err(e) => {
                    tracing::error!("store read failed for {}: {:#}", video_id, e);
                    continue;
                }
            };

            if !self.claimable(&record) {
                tracing::info!(
                    "skipping {} ({}), another worker holds it",
                    video_id,
                    source
                );
                continue;
            }

            let pipeline = self.pipeline.clone();
            let download_pool = self.download_pool.clone();
            let transcription_pool = self.transcription_pool.clone();
            let cancel = self.cancel.clone();

            join_set.spawn(async move {
                if cancel.is_cancelled() {
                    return None;
                }

                // Media half under the download pool
                let media = {
                    let _permit = download_pool.acquire_owned().await.ok()?;
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        result = pipeline.run_media_stages(&video_id, source) => result,
                    }
                };

                let media = match media {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!("pipeline error for {}: {:#}", video_id, e);
                        return Some(VideoOutcome {
                            video_id,
                            source,
                            downloaded: false,
                            transcribed: false,
                            failure: Some(format!("pipeline error: {:#}", e)),
                        });
                    }
                };
                if !media.succeeded() {
                    return Some(media);
                }

                // Transcription half under its own pool
                let _permit = transcription_pool.acquire_owned().await.ok()?;
                let transcription = tokio::select! {
                    _ = cancel.cancelled() => return Some(media),
                    result = pipeline.run_transcription(&video_id, source) => result,
                };
                match transcription {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        tracing::error!("pipeline error for {}: {:#}", video_id, e);
                        Some(VideoOutcome {
                            video_id,
                            source,
                            downloaded: true,
                            transcribed: false,
                            failure: Some(format!("pipeline error: {:#}", e)),
                        })
                    }
                }
            });
        }

        let mut summary = RunSummary::default();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Some(outcome)) => summary.absorb(outcome),
                Ok(None) => {} // cancelled before starting
                Err(e) => tracing::error!("worker task panicked: {}", e),
            }
        }
        summary
    }

    /// Run a sweep, then re-enter everything it reclassified: cheap
    /// transcription-only retries first, full restarts through the pipeline.
    pub async fn run_sweep(&self, sweeper: &RecoverySweeper) -> Result<(SweepReport, RunSummary)> {
        let report = sweeper.sweep()?;
        let mut summary = RunSummary::default();

        for (video_id, source) in &report.requeued_transcriptions {
            if self.cancel.is_cancelled() {
                break;
            }
            let _permit = self
                .transcription_pool
                .acquire()
                .await
                .map_err(|_| anyhow::anyhow!("transcription pool closed"))?;
            match self.pipeline.run_transcription(video_id, *source).await {
                Ok(outcome) => summary.absorb(outcome),
                Err(e) => {
                    tracing::error!("transcription retry failed for {}: {:#}", video_id, e);
                    summary.absorb(VideoOutcome {
                        video_id: video_id.clone(),
                        source: *source,
                        downloaded: true,
                        transcribed: false,
                        failure: Some(format!("pipeline error: {:#}", e)),
                    });
                }
            }
        }

        let restarted = self.process_batch(report.restarted_downloads.clone()).await;
        summary.merge(restarted);

        Ok((report, summary))
    }
}
