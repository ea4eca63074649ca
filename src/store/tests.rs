use super::*;
use chrono::TimeZone;
use tempfile::TempDir;

fn sample_video(id: &str, source: Source) -> VideoMetadata {
    VideoMetadata {
        video_id: id.to_string(),
        source,
        filename: format!("{}.mp4", id),
        origin_url: format!("https://archive.example/player?video={}.mp4", id),
        stream_url: None,
        date_recorded: Utc.with_ymd_and_hms(2025, 2, 20, 0, 0, 0).unwrap(),
        committee: Some("Agriculture".to_string()),
        title: Some("Agriculture - Thursday, February 20, 2025".to_string()),
    }
}

fn setup() -> (VideoStore, TempDir) {
    let temp = TempDir::new().unwrap();
    let store = VideoStore::open_in_memory().unwrap();
    (store, temp)
}

fn touch(temp: &TempDir, name: &str) -> String {
    let path = temp.path().join(name);
    fs_err::write(&path, b"0000ftypisom-payload-bytes").unwrap();
    path.to_string_lossy().to_string()
}

#[test]
fn test_create_and_get_roundtrip() {
    let (store, _temp) = setup();
    store.create(&sample_video("HAGRI-022025", Source::House)).unwrap();

    let record = store.get("HAGRI-022025", Source::House).unwrap().unwrap();
    assert_eq!(record.video_id, "HAGRI-022025");
    assert_eq!(record.source, Source::House);
    assert_eq!(record.filename, "HAGRI-022025.mp4");
    assert_eq!(record.download_stage, DownloadStage::Pending);
    assert_eq!(record.audio_stage, AudioStage::Pending);
    assert_eq!(record.transcription_stage, TranscriptionStage::Pending);
    assert!(record.download_path.is_none());
    assert!(record.audio_path.is_none());
}

#[test]
fn test_create_duplicate_fails() {
    let (store, _temp) = setup();
    store.create(&sample_video("HAGRI-022025", Source::House)).unwrap();

    let result = store.create(&sample_video("HAGRI-022025", Source::House));
    assert!(result.is_err());

    // Same id under a different source is a distinct record
    store.create(&sample_video("HAGRI-022025", Source::Senate)).unwrap();
}

#[test]
fn test_get_missing_returns_none() {
    let (store, _temp) = setup();
    assert!(store.get("nope", Source::House).unwrap().is_none());
}

#[test]
fn test_partial_update_leaves_other_stages_untouched() {
    let (store, _temp) = setup();
    store.create(&sample_video("v1", Source::House)).unwrap();

    store
        .update_stages("v1", Source::House, &StageUpdate::download(DownloadStage::InProgress))
        .unwrap();

    let record = store.get("v1", Source::House).unwrap().unwrap();
    assert_eq!(record.download_stage, DownloadStage::InProgress);
    assert_eq!(record.audio_stage, AudioStage::Pending);
    assert_eq!(record.transcription_stage, TranscriptionStage::Pending);
}

#[test]
fn test_update_refreshes_updated_at() {
    let (store, _temp) = setup();
    store.create(&sample_video("v1", Source::House)).unwrap();
    let before = store.get("v1", Source::House).unwrap().unwrap().updated_at;

    std::thread::sleep(std::time::Duration::from_millis(5));
    store
        .update_stages("v1", Source::House, &StageUpdate::download(DownloadStage::InProgress))
        .unwrap();

    let after = store.get("v1", Source::House).unwrap().unwrap().updated_at;
    assert!(after > before);
}

#[test]
fn test_mark_downloaded_requires_existing_artifact() {
    let (store, temp) = setup();
    store.create(&sample_video("v1", Source::House)).unwrap();

    // Path pointing nowhere is rejected
    let bogus = StageUpdate::download(DownloadStage::Downloaded)
        .with_download_path("/nonexistent/v1.mp4");
    assert!(store.update_stages("v1", Source::House, &bogus).is_err());

    // Downloaded without a path is rejected
    let pathless = StageUpdate::download(DownloadStage::Downloaded);
    assert!(store.update_stages("v1", Source::House, &pathless).is_err());

    // Real artifact is accepted
    let path = touch(&temp, "v1.mp4");
    let ok = StageUpdate::download(DownloadStage::Downloaded).with_download_path(&path);
    store.update_stages("v1", Source::House, &ok).unwrap();

    let record = store.get("v1", Source::House).unwrap().unwrap();
    assert_eq!(record.download_stage, DownloadStage::Downloaded);
    assert_eq!(record.download_path, Some(path));
}

#[test]
fn test_download_path_without_downloaded_stage_rejected() {
    let (store, temp) = setup();
    store.create(&sample_video("v1", Source::House)).unwrap();
    let path = touch(&temp, "v1.mp4");

    let update = StageUpdate::download(DownloadStage::InProgress).with_download_path(&path);
    assert!(store.update_stages("v1", Source::House, &update).is_err());

    let mut update = StageUpdate::default();
    update.download_path = Some(path);
    assert!(store.update_stages("v1", Source::House, &update).is_err());
}

#[test]
fn test_resetting_stage_clears_artifact_path() {
    let (store, temp) = setup();
    store.create(&sample_video("v1", Source::House)).unwrap();
    let path = touch(&temp, "v1.mp4");
    store
        .update_stages(
            "v1",
            Source::House,
            &StageUpdate::download(DownloadStage::Downloaded).with_download_path(&path),
        )
        .unwrap();

    store
        .update_stages("v1", Source::House, &StageUpdate::download(DownloadStage::Pending))
        .unwrap();

    let record = store.get("v1", Source::House).unwrap().unwrap();
    assert_eq!(record.download_stage, DownloadStage::Pending);
    assert!(record.download_path.is_none(), "reset must clear the path");
}

// Exhaustive over every stage value with and without a path: after any
// accepted update, download_path is set iff the stage is Downloaded.
#[test]
fn test_download_path_invariant_over_all_stage_combinations() {
    let stages = [
        DownloadStage::Pending,
        DownloadStage::InProgress,
        DownloadStage::Downloaded,
        DownloadStage::Failed,
    ];

    for stage in stages {
        for with_path in [false, true] {
            let (store, temp) = setup();
            store.create(&sample_video("v1", Source::House)).unwrap();

            let mut update = StageUpdate::download(stage);
            if with_path {
                update = update.with_download_path(touch(&temp, "v1.mp4"));
            }

            if store.update_stages("v1", Source::House, &update).is_ok() {
                let record = store.get("v1", Source::House).unwrap().unwrap();
                let path_set = record.download_path.is_some();
                let downloaded = record.download_stage == DownloadStage::Downloaded;
                assert_eq!(
                    path_set, downloaded,
                    "invariant broken for stage {:?} with_path {}",
                    stage, with_path
                );
                if let Some(path) = &record.download_path {
                    assert!(std::path::Path::new(path).exists());
                }
            }
        }
    }
}

#[test]
fn test_audio_path_mirrors_download_invariant() {
    let (store, temp) = setup();
    store.create(&sample_video("v1", Source::Senate)).unwrap();

    assert!(store
        .update_stages(
            "v1",
            Source::Senate,
            &StageUpdate::audio(AudioStage::Extracted).with_audio_path("/nonexistent/v1.wav"),
        )
        .is_err());

    let path = touch(&temp, "v1.wav");
    store
        .update_stages(
            "v1",
            Source::Senate,
            &StageUpdate::audio(AudioStage::Extracted).with_audio_path(&path),
        )
        .unwrap();

    store
        .update_stages("v1", Source::Senate, &StageUpdate::audio(AudioStage::Pending))
        .unwrap();
    let record = store.get("v1", Source::Senate).unwrap().unwrap();
    assert!(record.audio_path.is_none());
}

#[test]
fn test_update_missing_record_is_not_found() {
    let (store, _temp) = setup();
    let result =
        store.update_stages("ghost", Source::House, &StageUpdate::download(DownloadStage::Failed));
    assert!(result.is_err());
}

#[test]
fn test_list_orders_most_recent_first_and_filters() {
    let (store, _temp) = setup();
    let mut old = sample_video("old", Source::House);
    old.date_recorded = Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap();
    let mut new = sample_video("new", Source::House);
    new.date_recorded = Utc.with_ymd_and_hms(2025, 3, 5, 0, 0, 0).unwrap();
    let senate = sample_video("sen", Source::Senate);

    store.create(&old).unwrap();
    store.create(&new).unwrap();
    store.create(&senate).unwrap();

    let all = store.list(&RecordFilter::default()).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].video_id, "new");

    let house_only = store
        .list(&RecordFilter {
            source: Some(Source::House),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(house_only.len(), 2);

    let window = DateWindow::new(
        Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap(),
    );
    let windowed = store
        .list(&RecordFilter {
            source: Some(Source::House),
            window: Some(window),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(windowed.len(), 1);
    assert_eq!(windowed[0].video_id, "new");
}

#[test]
fn test_list_pending_downloads() {
    let (store, temp) = setup();
    store.create(&sample_video("a", Source::House)).unwrap();
    store.create(&sample_video("b", Source::House)).unwrap();

    let path = touch(&temp, "a.mp4");
    store
        .update_stages(
            "a",
            Source::House,
            &StageUpdate::download(DownloadStage::Downloaded).with_download_path(&path),
        )
        .unwrap();

    let pending = store.list_pending_downloads(None, None).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].video_id, "b");
}

#[test]
fn test_list_failed_covers_both_stages() {
    let (store, _temp) = setup();
    store.create(&sample_video("dl", Source::House)).unwrap();
    store.create(&sample_video("tx", Source::Senate)).unwrap();
    store.create(&sample_video("ok", Source::House)).unwrap();

    store
        .update_stages("dl", Source::House, &StageUpdate::download(DownloadStage::Failed))
        .unwrap();
    store
        .update_stages(
            "tx",
            Source::Senate,
            &StageUpdate::transcription(TranscriptionStage::Failed),
        )
        .unwrap();

    let failed = store.list_failed().unwrap();
    let ids: Vec<&str> = failed.iter().map(|r| r.video_id.as_str()).collect();
    assert_eq!(failed.len(), 2);
    assert!(ids.contains(&"dl") && ids.contains(&"tx"));
}

#[test]
fn test_list_stale_in_progress() {
    let (store, _temp) = setup();
    store.create(&sample_video("stuck", Source::House)).unwrap();
    store.create(&sample_video("idle", Source::House)).unwrap();

    store
        .update_stages("stuck", Source::House, &StageUpdate::download(DownloadStage::InProgress))
        .unwrap();

    std::thread::sleep(std::time::Duration::from_millis(5));

    // Zero threshold: anything in progress before "now" counts as stale
    let stale = store.list_stale_in_progress(Duration::zero()).unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].video_id, "stuck");

    // A generous threshold finds nothing
    let stale = store.list_stale_in_progress(Duration::hours(2)).unwrap();
    assert!(stale.is_empty());
}

#[test]
fn test_transcripts_are_append_only() {
    let (store, _temp) = setup();
    store.create(&sample_video("v1", Source::House)).unwrap();

    store
        .add_transcript(&NewTranscript {
            video_id: "v1".to_string(),
            source: Source::House,
            provider: "local".to_string(),
            content: "first attempt".to_string(),
            segments_json: None,
            text_path: None,
        })
        .unwrap();
    store
        .add_transcript(&NewTranscript {
            video_id: "v1".to_string(),
            source: Source::House,
            provider: "openai".to_string(),
            content: "second attempt".to_string(),
            segments_json: Some("[]".to_string()),
            text_path: Some("/tmp/v1.txt".to_string()),
        })
        .unwrap();

    let transcripts = store.transcripts_for("v1", Source::House).unwrap();
    assert_eq!(transcripts.len(), 2);
    let providers: Vec<&str> = transcripts.iter().map(|t| t.provider.as_str()).collect();
    assert!(providers.contains(&"local") && providers.contains(&"openai"));
}

#[test]
fn test_search_joins_parent_video() {
    let (store, _temp) = setup();
    store.create(&sample_video("v1", Source::House)).unwrap();
    store
        .add_transcript(&NewTranscript {
            video_id: "v1".to_string(),
            source: Source::House,
            provider: "local".to_string(),
            content: "The committee discussed the Budget Amendment at length.".to_string(),
            segments_json: None,
            text_path: None,
        })
        .unwrap();

    let hits = store.search("budget amendment").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].video_id, "v1");
    assert_eq!(
        hits[0].title.as_deref(),
        Some("Agriculture - Thursday, February 20, 2025")
    );

    assert!(store.search("no such phrase").unwrap().is_empty());
}

#[test]
fn test_stats() {
    let (store, temp) = setup();
    store.create(&sample_video("a", Source::House)).unwrap();
    store.create(&sample_video("b", Source::House)).unwrap();
    store.create(&sample_video("c", Source::Senate)).unwrap();

    let path = touch(&temp, "a.mp4");
    store
        .update_stages(
            "a",
            Source::House,
            &StageUpdate::download(DownloadStage::Downloaded).with_download_path(&path),
        )
        .unwrap();
    store
        .update_stages("b", Source::House, &StageUpdate::download(DownloadStage::Failed))
        .unwrap();

    let stats = store.stats().unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.downloaded, 1);
    assert_eq!(stats.transcribed, 0);
    assert_eq!(stats.failed, 1);
}
