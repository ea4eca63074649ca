pub mod models;

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::GavelError;

pub use models::*;

/// Durable registry of one record per `(video_id, source)`.
///
/// The store is the only shared mutable state in the system; it is built once
/// at startup and handed to every component. All mutations are last-write-wins
/// on a single row; the pipeline guarantees at most one active worker per
/// record, so no optimistic concurrency is needed.
pub struct VideoStore {
    conn: Arc<Mutex<Connection>>,
}

impl VideoStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;

        // WAL mode for concurrent reads from stage workers
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA cache_size=10000;
            PRAGMA temp_store=MEMORY;
        ",
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS videos (
                video_id TEXT NOT NULL,
                source TEXT NOT NULL,
                filename TEXT NOT NULL,
                title TEXT,
                committee TEXT,
                origin_url TEXT NOT NULL,
                resolved_stream_url TEXT,
                date_recorded TEXT NOT NULL,
                date_discovered TEXT NOT NULL,
                download_stage TEXT NOT NULL DEFAULT 'pending',
                audio_stage TEXT NOT NULL DEFAULT 'pending',
                transcription_stage TEXT NOT NULL DEFAULT 'pending',
                download_path TEXT,
                audio_path TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (video_id, source)
            );

            CREATE INDEX IF NOT EXISTS idx_videos_download_stage
                ON videos(download_stage, source);
            CREATE INDEX IF NOT EXISTS idx_videos_transcription_stage
                ON videos(transcription_stage, source);
            CREATE INDEX IF NOT EXISTS idx_videos_recorded
                ON videos(date_recorded DESC);

            CREATE TABLE IF NOT EXISTS transcripts (
                id TEXT PRIMARY KEY,
                video_id TEXT NOT NULL,
                source TEXT NOT NULL,
                provider TEXT NOT NULL,
                content TEXT NOT NULL,
                segments_json TEXT,
                text_path TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (video_id, source) REFERENCES videos(video_id, source)
            );

            CREATE INDEX IF NOT EXISTS idx_transcripts_video
                ON transcripts(video_id, source);
            "#,
        )?;
        Ok(())
    }

    pub fn exists(&self, video_id: &str, source: Source) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM videos WHERE video_id = ?1 AND source = ?2",
            params![video_id, source.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Register a newly discovered video with every stage pending.
    ///
    /// Errors if the `(video_id, source)` pair already exists; discovery is
    /// expected to check `exists` first and skip.
    pub fn create(&self, video: &VideoMetadata) -> Result<()> {
        if self.exists(&video.video_id, video.source)? {
            anyhow::bail!(
                "video record already exists: {} ({})",
                video.video_id,
                video.source
            );
        }

        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO videos (
                video_id, source, filename, title, committee, origin_url,
                resolved_stream_url, date_recorded, date_discovered,
                download_stage, audio_stage, transcription_stage,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', 'pending', 'pending', ?10, ?10)",
            params![
                video.video_id,
                video.source.as_str(),
                video.filename,
                video.title,
                video.committee,
                video.origin_url,
                video.stream_url,
                video.date_recorded.to_rfc3339(),
                now,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, video_id: &str, source: Source) -> Result<Option<VideoRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                &format!("{} WHERE video_id = ?1 AND source = ?2", SELECT_VIDEO),
                params![video_id, source.as_str()],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Apply a partial stage update; untouched fields are left as-is and
    /// `updated_at` is always refreshed.
    ///
    /// The artifact-path invariant is enforced here: a success path may only
    /// be written together with its stage's terminal-success value and must
    /// point at an existing file, and moving a stage off terminal success
    /// clears the corresponding path.
    pub fn update_stages(
        &self,
        video_id: &str,
        source: Source,
        update: &StageUpdate,
    ) -> Result<()> {
        if update.download_path.is_some()
            && update.download_stage != Some(DownloadStage::Downloaded)
        {
            return Err(GavelError::StagePrecondition(format!(
                "download_path may only be set when marking {} downloaded",
                video_id
            ))
            .into());
        }
        if update.download_stage == Some(DownloadStage::Downloaded) {
            match &update.download_path {
                Some(path) if Path::new(path).exists() => {}
                Some(path) => {
                    return Err(GavelError::StagePrecondition(format!(
                        "download artifact missing on disk: {}",
                        path
                    ))
                    .into());
                }
                None => {
                    return Err(GavelError::StagePrecondition(format!(
                        "marking {} downloaded requires a download_path",
                        video_id
                    ))
                    .into());
                }
            }
        }
        if update.audio_path.is_some() && update.audio_stage != Some(AudioStage::Extracted) {
            return Err(GavelError::StagePrecondition(format!(
                "audio_path may only be set when marking {} extracted",
                video_id
            ))
            .into());
        }
        if update.audio_stage == Some(AudioStage::Extracted) {
            match &update.audio_path {
                Some(path) if Path::new(path).exists() => {}
                Some(path) => {
                    return Err(GavelError::StagePrecondition(format!(
                        "audio artifact missing on disk: {}",
                        path
                    ))
                    .into());
                }
                None => {
                    return Err(GavelError::StagePrecondition(format!(
                        "marking {} extracted requires an audio_path",
                        video_id
                    ))
                    .into());
                }
            }
        }

        let mut sets: Vec<&str> = vec!["updated_at = ?"];
        let mut values: Vec<Value> = vec![Value::Text(Utc::now().to_rfc3339())];

        if let Some(stage) = update.download_stage {
            sets.push("download_stage = ?");
            values.push(Value::Text(stage.as_str().to_string()));
            if stage != DownloadStage::Downloaded {
                sets.push("download_path = NULL");
            }
        }
        if let Some(path) = &update.download_path {
            sets.push("download_path = ?");
            values.push(Value::Text(path.clone()));
        }
        if let Some(stage) = update.audio_stage {
            sets.push("audio_stage = ?");
            values.push(Value::Text(stage.as_str().to_string()));
            if stage != AudioStage::Extracted {
                sets.push("audio_path = NULL");
            }
        }
        if let Some(path) = &update.audio_path {
            sets.push("audio_path = ?");
            values.push(Value::Text(path.clone()));
        }
        if let Some(stage) = update.transcription_stage {
            sets.push("transcription_stage = ?");
            values.push(Value::Text(stage.as_str().to_string()));
        }
        if let Some(reason) = &update.last_error {
            sets.push("last_error = ?");
            values.push(Value::Text(reason.clone()));
        }

        values.push(Value::Text(video_id.to_string()));
        values.push(Value::Text(source.as_str().to_string()));

        let sql = format!(
            "UPDATE videos SET {} WHERE video_id = ? AND source = ?",
            sets.join(", ")
        );

        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        if affected == 0 {
            return Err(GavelError::RecordNotFound(format!("{} ({})", video_id, source)).into());
        }
        Ok(())
    }

    /// Cache a freshly resolved stream URL on the record
    pub fn update_stream_url(&self, video_id: &str, source: Source, url: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE videos SET resolved_stream_url = ?1, updated_at = ?2
             WHERE video_id = ?3 AND source = ?4",
            params![url, Utc::now().to_rfc3339(), video_id, source.as_str()],
        )?;
        if affected == 0 {
            return Err(GavelError::RecordNotFound(format!("{} ({})", video_id, source)).into());
        }
        Ok(())
    }

    /// List records most-recent-first, optionally filtered
    pub fn list(&self, filter: &RecordFilter) -> Result<Vec<VideoRecord>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(source) = filter.source {
            clauses.push("source = ?");
            values.push(Value::Text(source.as_str().to_string()));
        }
        if let Some(stage) = filter.download_stage {
            clauses.push("download_stage = ?");
            values.push(Value::Text(stage.as_str().to_string()));
        }
        if let Some(stage) = filter.transcription_stage {
            clauses.push("transcription_stage = ?");
            values.push(Value::Text(stage.as_str().to_string()));
        }
        if let Some(window) = &filter.window {
            clauses.push("date_recorded >= ?");
            values.push(Value::Text(window.start.to_rfc3339()));
            clauses.push("date_recorded <= ?");
            values.push(Value::Text(window.end.to_rfc3339()));
        }

        let mut sql = SELECT_VIDEO.to_string();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY date_recorded DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values), row_to_record)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Records waiting for a download, oldest window first served by caller
    pub fn list_pending_downloads(
        &self,
        window: Option<DateWindow>,
        source: Option<Source>,
    ) -> Result<Vec<VideoRecord>> {
        self.list(&RecordFilter {
            source,
            download_stage: Some(DownloadStage::Pending),
            window,
            ..Default::default()
        })
    }

    /// Records with a failed download or transcription, for the sweeper
    pub fn list_failed(&self) -> Result<Vec<VideoRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE download_stage = 'failed' OR transcription_stage = 'failed'
             ORDER BY date_recorded DESC",
            SELECT_VIDEO
        ))?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Records stuck in an in-progress stage longer than `older_than`.
    ///
    /// A worker that died mid-stage leaves its in-progress marker behind;
    /// these records are eligible for reclaim by the sweeper.
    pub fn list_stale_in_progress(&self, older_than: Duration) -> Result<Vec<VideoRecord>> {
        let cutoff = (Utc::now() - older_than).to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE (download_stage = 'in_progress'
                OR audio_stage = 'extracting'
                OR transcription_stage = 'in_progress')
               AND updated_at < ?1
             ORDER BY updated_at ASC",
            SELECT_VIDEO
        ))?;
        let rows = stmt.query_map(params![cutoff], row_to_record)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Append a transcription attempt. Existing attempts are never replaced,
    /// so multiple providers can be compared per video.
    pub fn add_transcript(&self, transcript: &NewTranscript) -> Result<TranscriptRecord> {
        let record = TranscriptRecord {
            id: uuid::Uuid::new_v4().to_string(),
            video_id: transcript.video_id.clone(),
            source: transcript.source,
            provider: transcript.provider.clone(),
            content: transcript.content.clone(),
            segments_json: transcript.segments_json.clone(),
            text_path: transcript.text_path.clone(),
            created_at: Utc::now(),
        };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO transcripts (id, video_id, source, provider, content, segments_json, text_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.video_id,
                record.source.as_str(),
                record.provider,
                record.content,
                record.segments_json,
                record.text_path,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(record)
    }

    /// All transcription attempts for one video, newest first
    pub fn transcripts_for(&self, video_id: &str, source: Source) -> Result<Vec<TranscriptRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, video_id, source, provider, content, segments_json, text_path, created_at
             FROM transcripts WHERE video_id = ?1 AND source = ?2
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![video_id, source.as_str()], row_to_transcript)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Case-insensitive substring search across all transcript content,
    /// joined with the parent video
    pub fn search(&self, query: &str) -> Result<Vec<TranscriptHit>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT t.video_id, t.source, v.title, v.date_recorded, t.provider, t.content
             FROM transcripts t
             JOIN videos v ON t.video_id = v.video_id AND t.source = v.source
             WHERE t.content LIKE '%' || ?1 || '%'
             ORDER BY v.date_recorded DESC",
        )?;
        let rows = stmt.query_map(params![query], |row| {
            Ok(TranscriptHit {
                video_id: row.get(0)?,
                source: parse_source(row.get::<_, String>(1)?),
                title: row.get(2)?,
                date_recorded: parse_dt(row.get::<_, String>(3)?),
                provider: row.get(4)?,
                content: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock().unwrap();
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        };
        Ok(StoreStats {
            total: count("SELECT COUNT(*) FROM videos")?,
            downloaded: count("SELECT COUNT(*) FROM videos WHERE download_stage = 'downloaded'")?,
            transcribed: count(
                "SELECT COUNT(*) FROM videos WHERE transcription_stage = 'completed'",
            )?,
            failed: count(
                "SELECT COUNT(*) FROM videos
                 WHERE download_stage = 'failed' OR transcription_stage = 'failed'",
            )?,
        })
    }
}

const SELECT_VIDEO: &str = "SELECT video_id, source, filename, title, committee, origin_url,
    resolved_stream_url, date_recorded, date_discovered, download_stage, audio_stage,
    transcription_stage, download_path, audio_path, last_error, created_at, updated_at
    FROM videos";

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<VideoRecord> {
    Ok(VideoRecord {
        video_id: row.get(0)?,
        source: parse_source(row.get::<_, String>(1)?),
        filename: row.get(2)?,
        title: row.get(3)?,
        committee: row.get(4)?,
        origin_url: row.get(5)?,
        resolved_stream_url: row.get(6)?,
        date_recorded: parse_dt(row.get::<_, String>(7)?),
        date_discovered: parse_dt(row.get::<_, String>(8)?),
        download_stage: DownloadStage::from(row.get::<_, String>(9)?),
        audio_stage: AudioStage::from(row.get::<_, String>(10)?),
        transcription_stage: TranscriptionStage::from(row.get::<_, String>(11)?),
        download_path: row.get(12)?,
        audio_path: row.get(13)?,
        last_error: row.get(14)?,
        created_at: parse_dt(row.get::<_, String>(15)?),
        updated_at: parse_dt(row.get::<_, String>(16)?),
    })
}

fn row_to_transcript(row: &rusqlite::Row<'_>) -> rusqlite::Result<TranscriptRecord> {
    Ok(TranscriptRecord {
        id: row.get(0)?,
        video_id: row.get(1)?,
        source: parse_source(row.get::<_, String>(2)?),
        provider: row.get(3)?,
        content: row.get(4)?,
        segments_json: row.get(5)?,
        text_path: row.get(6)?,
        created_at: parse_dt(row.get::<_, String>(7)?),
    })
}

fn parse_source(s: String) -> Source {
    match s.as_str() {
        "senate" => Source::Senate,
        _ => Source::House,
    }
}

fn parse_dt(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
