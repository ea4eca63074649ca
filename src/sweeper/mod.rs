use chrono::Duration;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::store::{
    AudioStage, DownloadStage, Source, StageUpdate, TranscriptionStage, VideoStore,
};
use crate::Result;

/// What one sweep decided to do
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Audio artifact still on disk: retry only the transcription stage
    pub requeued_transcriptions: Vec<(String, Source)>,
    /// Artifact lost or download failed: restart from the download stage
    pub restarted_downloads: Vec<(String, Source)>,
    /// In-progress markers reclaimed from dead workers
    pub reclaimed_stale: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.requeued_transcriptions.is_empty()
            && self.restarted_downloads.is_empty()
            && self.reclaimed_stale == 0
    }
}

/// Finds failed or abandoned records and reclassifies them for re-entry.
///
/// The policy split matters: "retry cheaply from where we left off" when the
/// required upstream artifact survives, "restart from download" when it does
/// not. A stage is never re-entered with its upstream artifact missing.
pub struct RecoverySweeper {
    store: Arc<VideoStore>,
    stale_after: Duration,
}

impl RecoverySweeper {
    pub fn new(store: Arc<VideoStore>, stale_after_minutes: i64) -> Self {
        Self {
            store,
            stale_after: Duration::minutes(stale_after_minutes),
        }
    }

    pub fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut touched: HashSet<(String, Source)> = HashSet::new();

        // Dead workers leave in-progress markers behind; flip the stuck
        // stage so the normal classification below applies.
        for record in self.store.list_stale_in_progress(self.stale_after)? {
            tracing::warn!(
                "reclaiming stale in-progress record {} ({}), last touched {}",
                record.video_id,
                record.source,
                record.updated_at
            );
            if record.download_stage == DownloadStage::InProgress {
                self.store.update_stages(
                    &record.video_id,
                    record.source,
                    &StageUpdate::download(DownloadStage::Failed)
                        .with_error("reclaimed stale download"),
                )?;
            } else if record.audio_stage == AudioStage::Extracting {
                // The download survives; send the record back through the
                // pipeline, which skips straight to extraction.
                self.store.update_stages(
                    &record.video_id,
                    record.source,
                    &StageUpdate::audio(AudioStage::Pending)
                        .with_error("reclaimed stale extraction"),
                )?;
                if touched.insert((record.video_id.clone(), record.source)) {
                    report
                        .restarted_downloads
                        .push((record.video_id.clone(), record.source));
                }
            } else if record.transcription_stage == TranscriptionStage::InProgress {
                self.store.update_stages(
                    &record.video_id,
                    record.source,
                    &StageUpdate::transcription(TranscriptionStage::Failed)
                        .with_error("reclaimed stale transcription"),
                )?;
            }
            report.reclaimed_stale += 1;
        }

        for record in self.store.list_failed()? {
            let key = (record.video_id.clone(), record.source);
            if touched.contains(&key) {
                continue;
            }

            if record.transcription_stage == TranscriptionStage::Failed {
                let audio_present = record
                    .audio_path
                    .as_ref()
                    .is_some_and(|path| Path::new(path).exists());

                if audio_present {
                    tracing::info!(
                        "re-queueing transcription for {} (audio exists)",
                        record.video_id
                    );
                    self.store.update_stages(
                        &record.video_id,
                        record.source,
                        &StageUpdate::transcription(TranscriptionStage::Pending),
                    )?;
                    report.requeued_transcriptions.push(key.clone());
                } else {
                    tracing::info!(
                        "restarting {} from download (audio artifact missing)",
                        record.video_id
                    );
                    self.store.update_stages(
                        &record.video_id,
                        record.source,
                        &StageUpdate {
                            download_stage: Some(DownloadStage::Pending),
                            audio_stage: Some(AudioStage::Pending),
                            transcription_stage: Some(TranscriptionStage::Pending),
                            ..Default::default()
                        },
                    )?;
                    report.restarted_downloads.push(key.clone());
                }
                touched.insert(key);
            } else if record.download_stage == DownloadStage::Failed {
                tracing::info!("retrying download for {}", record.video_id);
                self.store.update_stages(
                    &record.video_id,
                    record.source,
                    &StageUpdate::download(DownloadStage::Pending),
                )?;
                report.restarted_downloads.push(key.clone());
                touched.insert(key);
            }
        }

        if !report.is_empty() {
            tracing::info!(
                "sweep complete: {} transcription retries, {} download restarts, {} stale reclaims",
                report.requeued_transcriptions.len(),
                report.restarted_downloads.len(),
                report.reclaimed_stale
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::VideoMetadata;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn meta(id: &str) -> VideoMetadata {
        VideoMetadata {
            video_id: id.to_string(),
            source: Source::House,
            filename: format!("{}.mp4", id),
            origin_url: format!("https://archive.example/player?video={}.mp4", id),
            stream_url: None,
            date_recorded: Utc.with_ymd_and_hms(2025, 2, 20, 0, 0, 0).unwrap(),
            committee: None,
            title: None,
        }
    }

    fn setup() -> (Arc<VideoStore>, TempDir, RecoverySweeper) {
        let store = Arc::new(VideoStore::open_in_memory().unwrap());
        let temp = TempDir::new().unwrap();
        let sweeper = RecoverySweeper::new(store.clone(), 120);
        (store, temp, sweeper)
    }

    fn touch(temp: &TempDir, name: &str) -> String {
        let path = temp.path().join(name);
        fs_err::write(&path, b"artifact-bytes-on-disk").unwrap();
        path.to_string_lossy().to_string()
    }

    /// Drive a record to: downloaded + extracted + transcription failed
    fn failed_transcription(store: &VideoStore, temp: &TempDir, id: &str) -> String {
        store.create(&meta(id)).unwrap();
        let video = touch(temp, &format!("{}.mp4", id));
        let audio = touch(temp, &format!("{}.wav", id));
        store
            .update_stages(
                id,
                Source::House,
                &StageUpdate::download(DownloadStage::Downloaded).with_download_path(&video),
            )
            .unwrap();
        store
            .update_stages(
                id,
                Source::House,
                &StageUpdate::audio(AudioStage::Extracted).with_audio_path(&audio),
            )
            .unwrap();
        store
            .update_stages(
                id,
                Source::House,
                &StageUpdate::transcription(TranscriptionStage::Failed),
            )
            .unwrap();
        audio
    }

    #[test]
    fn test_failed_transcription_with_audio_retries_cheaply() {
        let (store, temp, sweeper) = setup();
        failed_transcription(&store, &temp, "v1");

        let report = sweeper.sweep().unwrap();

        assert_eq!(
            report.requeued_transcriptions,
            vec![("v1".to_string(), Source::House)]
        );
        assert!(report.restarted_downloads.is_empty());

        let record = store.get("v1", Source::House).unwrap().unwrap();
        assert_eq!(record.transcription_stage, TranscriptionStage::Pending);
        // Download and audio stages untouched
        assert_eq!(record.download_stage, DownloadStage::Downloaded);
        assert_eq!(record.audio_stage, AudioStage::Extracted);
        assert!(record.audio_path.is_some());
    }

    #[test]
    fn test_failed_transcription_without_audio_restarts_from_download() {
        let (store, temp, sweeper) = setup();
        let audio = failed_transcription(&store, &temp, "v1");
        fs_err::remove_file(&audio).unwrap();

        let report = sweeper.sweep().unwrap();

        assert!(report.requeued_transcriptions.is_empty());
        assert_eq!(
            report.restarted_downloads,
            vec![("v1".to_string(), Source::House)]
        );

        let record = store.get("v1", Source::House).unwrap().unwrap();
        assert_eq!(record.download_stage, DownloadStage::Pending);
        assert_eq!(record.audio_stage, AudioStage::Pending);
        assert_eq!(record.transcription_stage, TranscriptionStage::Pending);
        assert!(record.download_path.is_none());
        assert!(record.audio_path.is_none());
    }

    #[test]
    fn test_failed_download_resets_to_pending() {
        let (store, _temp, sweeper) = setup();
        store.create(&meta("v1")).unwrap();
        store
            .update_stages(
                "v1",
                Source::House,
                &StageUpdate::download(DownloadStage::Failed).with_error("undersized payload"),
            )
            .unwrap();

        let report = sweeper.sweep().unwrap();

        assert_eq!(
            report.restarted_downloads,
            vec![("v1".to_string(), Source::House)]
        );
        let record = store.get("v1", Source::House).unwrap().unwrap();
        assert_eq!(record.download_stage, DownloadStage::Pending);
    }

    #[test]
    fn test_record_failed_in_both_stages_classified_once() {
        let (store, temp, sweeper) = setup();
        let audio = failed_transcription(&store, &temp, "v1");
        fs_err::remove_file(&audio).unwrap();
        // Also fail the download (resets paths, stages stay failed)
        store
            .update_stages(
                "v1",
                Source::House,
                &StageUpdate::download(DownloadStage::Failed),
            )
            .unwrap();

        let report = sweeper.sweep().unwrap();
        assert_eq!(report.restarted_downloads.len(), 1);
        assert!(report.requeued_transcriptions.is_empty());
    }

    #[test]
    fn test_healthy_records_untouched() {
        let (store, temp, sweeper) = setup();
        store.create(&meta("pending")).unwrap();
        store.create(&meta("done")).unwrap();
        let video = touch(&temp, "done.mp4");
        store
            .update_stages(
                "done",
                Source::House,
                &StageUpdate::download(DownloadStage::Downloaded).with_download_path(&video),
            )
            .unwrap();

        let report = sweeper.sweep().unwrap();
        assert!(report.is_empty());

        assert_eq!(
            store.get("pending", Source::House).unwrap().unwrap().download_stage,
            DownloadStage::Pending
        );
        assert_eq!(
            store.get("done", Source::House).unwrap().unwrap().download_stage,
            DownloadStage::Downloaded
        );
    }

    #[test]
    fn test_stale_in_progress_download_is_reclaimed_and_restarted() {
        let (store, _temp, _) = setup();
        store.create(&meta("stuck")).unwrap();
        store
            .update_stages(
                "stuck",
                Source::House,
                &StageUpdate::download(DownloadStage::InProgress),
            )
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        // Zero threshold makes the fresh marker count as stale
        let sweeper = RecoverySweeper::new(store.clone(), 0);
        let report = sweeper.sweep().unwrap();

        assert_eq!(report.reclaimed_stale, 1);
        assert_eq!(
            report.restarted_downloads,
            vec![("stuck".to_string(), Source::House)]
        );
        let record = store.get("stuck", Source::House).unwrap().unwrap();
        assert_eq!(record.download_stage, DownloadStage::Pending);
    }

    #[test]
    fn test_stale_transcription_becomes_cheap_retry_when_audio_survives() {
        let (store, temp, _) = setup();
        store.create(&meta("stuck")).unwrap();
        let video = touch(&temp, "stuck.mp4");
        let audio = touch(&temp, "stuck.wav");
        store
            .update_stages(
                "stuck",
                Source::House,
                &StageUpdate::download(DownloadStage::Downloaded).with_download_path(&video),
            )
            .unwrap();
        store
            .update_stages(
                "stuck",
                Source::House,
                &StageUpdate::audio(AudioStage::Extracted).with_audio_path(&audio),
            )
            .unwrap();
        store
            .update_stages(
                "stuck",
                Source::House,
                &StageUpdate::transcription(TranscriptionStage::InProgress),
            )
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        let sweeper = RecoverySweeper::new(store.clone(), 0);
        let report = sweeper.sweep().unwrap();

        assert_eq!(report.reclaimed_stale, 1);
        assert_eq!(
            report.requeued_transcriptions,
            vec![("stuck".to_string(), Source::House)]
        );
    }
}
