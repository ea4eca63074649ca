use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::VideoSource;
use crate::store::{DateWindow, Source, VideoMetadata};
use crate::utils::parse_senate_date;
use crate::{GavelError, Result};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Discovers videos from the Senate hosting provider's recent-videos API.
///
/// The endpoint wants browser-like headers and has shipped its file list
/// under several different keys over time, so extraction stays tolerant.
pub struct SenateSource {
    api_url: String,
    player_base_url: String,
    referer: String,
    client: Client,
}

impl SenateSource {
    pub fn new(api_url: String, player_base_url: String, referer: String) -> Self {
        Self {
            api_url,
            player_base_url,
            referer,
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    /// The file list has been seen under each of these keys
    pub(crate) fn extract_video_list(data: &Value) -> Vec<Value> {
        if let Some(list) = data.as_array() {
            return list.clone();
        }
        for key in ["allFiles", "items", "videos", "results", "data"] {
            if let Some(list) = data.get(key).and_then(|v| v.as_array()) {
                return list.clone();
            }
        }
        Vec::new()
    }

    pub(crate) fn parse_video_data(
        &self,
        item: &Value,
        window: &DateWindow,
    ) -> Option<VideoMetadata> {
        let video_id = item
            .get("_id")
            .or_else(|| item.get("id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())?;
        if video_id.is_empty() {
            return None;
        }

        let metadata = item.get("metadata");
        let title = metadata
            .and_then(|m| m.get("title"))
            .or_else(|| item.get("title"))
            .or_else(|| item.get("name"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let date_string = item
            .get("date")
            .or_else(|| item.get("original_date"))
            .and_then(|v| v.as_str())?;
        let date_recorded = parse_iso_date(date_string)
            .or_else(|| parse_senate_date(date_string))
            .or_else(|| title.as_deref().and_then(parse_senate_date));
        let Some(date_recorded) = date_recorded else {
            tracing::warn!("could not parse date from: {}", date_string);
            return None;
        };

        if !window.contains(date_recorded) {
            return None;
        }

        let committee = item
            .get("agenda")
            .and_then(|a| a.get("name").or_else(|| a.get("title")))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .or_else(|| {
                metadata
                    .and_then(|m| m.get("committee").or_else(|| m.get("playlist")))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
            });

        Some(VideoMetadata {
            filename: format!("{}.mp4", video_id),
            origin_url: format!(
                "{}/{}",
                self.player_base_url.trim_end_matches('/'),
                video_id
            ),
            video_id,
            source: Source::Senate,
            stream_url: None,
            date_recorded,
            committee,
            title,
        })
    }
}

#[async_trait]
impl VideoSource for SenateSource {
    fn source(&self) -> Source {
        Source::Senate
    }

    async fn discover(
        &self,
        window: &DateWindow,
        limit: Option<usize>,
    ) -> Result<Vec<VideoMetadata>> {
        let origin = url::Url::parse(&self.referer)
            .ok()
            .and_then(|u| u.host_str().map(|h| format!("{}://{}", u.scheme(), h)))
            .unwrap_or_else(|| self.referer.clone());

        let response = self
            .client
            .get(&self.api_url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json, text/plain, */*")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Origin", origin)
            .header("Referer", &self.referer)
            .send()
            .await
            .map_err(|e| GavelError::Network(format!("archive API request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(GavelError::Network(format!(
                "archive API returned {}",
                response.status()
            ))
            .into());
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| GavelError::Network(format!("archive API body unreadable: {}", e)))?;

        let video_list = Self::extract_video_list(&data);
        if video_list.is_empty() {
            tracing::warn!(
                "archive API returned an empty video list; it may want authentication or \
                 different parameters"
            );
        }

        let mut videos = Vec::new();
        for item in &video_list {
            if let Some(video) = self.parse_video_data(item, window) {
                videos.push(video);
                if limit.is_some_and(|limit| videos.len() >= limit) {
                    break;
                }
            }
        }

        tracing::info!("discovered {} videos from the archive API", videos.len());
        Ok(videos)
    }
}

fn parse_iso_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    fn source() -> SenateSource {
        SenateSource::new(
            "https://api.example/home/recent".to_string(),
            "https://player.example/vod/video".to_string(),
            "https://player.example/vod/".to_string(),
        )
    }

    fn december_2025() -> DateWindow {
        DateWindow::new(
            Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap(),
        )
    }

    #[test]
    fn test_extract_video_list_tolerates_key_variants() {
        let under_all_files: Value =
            serde_json::json!({"record": 1, "allFiles": [{"_id": "a"}], "count": 1});
        assert_eq!(SenateSource::extract_video_list(&under_all_files).len(), 1);

        let under_items: Value = serde_json::json!({"items": [{"_id": "a"}, {"_id": "b"}]});
        assert_eq!(SenateSource::extract_video_list(&under_items).len(), 2);

        let bare_array: Value = serde_json::json!([{"_id": "a"}]);
        assert_eq!(SenateSource::extract_video_list(&bare_array).len(), 1);

        let nothing: Value = serde_json::json!({"status": "ok"});
        assert!(SenateSource::extract_video_list(&nothing).is_empty());
    }

    #[test]
    fn test_parse_video_data() {
        let item = serde_json::json!({
            "_id": "abc123",
            "date": "2025-12-23T17:01:05.730Z",
            "metadata": {"title": "Senate Session 25-12-23"},
            "agenda": {"name": "Appropriations"}
        });

        let video = source().parse_video_data(&item, &december_2025()).unwrap();
        assert_eq!(video.video_id, "abc123");
        assert_eq!(video.source, Source::Senate);
        assert_eq!(video.filename, "abc123.mp4");
        assert_eq!(video.origin_url, "https://player.example/vod/video/abc123");
        assert_eq!(video.title.as_deref(), Some("Senate Session 25-12-23"));
        assert_eq!(video.committee.as_deref(), Some("Appropriations"));
        assert_eq!(
            (video.date_recorded.year(), video.date_recorded.month()),
            (2025, 12)
        );
    }

    #[test]
    fn test_parse_video_data_outside_window_dropped() {
        let item = serde_json::json!({
            "_id": "abc123",
            "date": "2025-06-01T00:00:00.000Z",
            "title": "Session"
        });
        assert!(source().parse_video_data(&item, &december_2025()).is_none());
    }

    #[test]
    fn test_parse_video_data_falls_back_to_short_date_convention() {
        let item = serde_json::json!({
            "_id": "abc123",
            "date": "25-12-23",
            "title": "Senate Session"
        });
        let video = source().parse_video_data(&item, &december_2025()).unwrap();
        assert_eq!(video.date_recorded.day(), 23);
    }

    #[test]
    fn test_parse_video_data_requires_id_and_date() {
        let no_id = serde_json::json!({"date": "2025-12-23T00:00:00Z"});
        assert!(source().parse_video_data(&no_id, &december_2025()).is_none());

        let no_date = serde_json::json!({"_id": "abc123"});
        assert!(source().parse_video_data(&no_date, &december_2025()).is_none());
    }
}
