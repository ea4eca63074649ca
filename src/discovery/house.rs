use async_trait::async_trait;
use chrono::Datelike;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;

use super::VideoSource;
use crate::store::{DateWindow, Source, VideoMetadata};
use crate::utils::parse_house_date;
use crate::{GavelError, Result};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Discovers videos from the House archive's per-year listing pages.
///
/// The listing groups player links under committee headings; each link's text
/// carries the recording date ("Thursday, February 20, 2025", sometimes with
/// a "- Part N" suffix).
pub struct HouseSource {
    archive_url: String,
    base_url: String,
    client: Client,
}

impl HouseSource {
    pub fn new(archive_url: String, base_url: String) -> Self {
        Self {
            archive_url,
            base_url,
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    async fn fetch_archive_for_year(&self, year: i32) -> Result<String> {
        let handler_url = format!(
            "{}?handler=ArchiveVideoPartial&Year={}&Type=All&Date=",
            self.archive_url, year
        );
        tracing::debug!("fetching archive listing: {}", handler_url);

        let response = self
            .client
            .get(&handler_url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| GavelError::Network(format!("archive listing fetch failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(GavelError::Network(format!(
                "archive listing for {} returned {}",
                year,
                response.status()
            ))
            .into());
        }

        Ok(response
            .text()
            .await
            .map_err(|e| GavelError::Network(format!("archive listing unreadable: {}", e)))?)
    }

    /// Walk the listing markup in document order, tracking the committee
    /// heading each player link sits under.
    pub(crate) fn parse_archive_listing(
        &self,
        html: &str,
        window: &DateWindow,
    ) -> Vec<VideoMetadata> {
        // One pattern, two alternatives: a committee heading or a player link
        let token_re = Regex::new(
            r#"(?s)<strong>([^<]+)</strong>|<a[^>]*href="([^"]*VideoArchivePlayer\?video=([^"&]+))"[^>]*>([^<]+)</a>"#,
        )
        .expect("listing pattern is valid");

        let mut committee: Option<String> = None;
        let mut videos = Vec::new();

        for caps in token_re.captures_iter(html) {
            if let Some(heading) = caps.get(1) {
                // Headings read "Committee Name | 5 Videos"
                committee = heading
                    .as_str()
                    .split('|')
                    .next()
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty());
                continue;
            }

            let (Some(href), Some(video_param), Some(link_text)) =
                (caps.get(2), caps.get(3), caps.get(4))
            else {
                continue;
            };

            let filename = urlencoding::decode(video_param.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|_| video_param.as_str().to_string());
            let video_id = filename.trim_end_matches(".mp4").to_string();
            let link_text = link_text.as_str().trim();

            let Some(date_recorded) = parse_house_date(link_text) else {
                tracing::warn!("could not parse date from link text: {}", link_text);
                continue;
            };
            if !window.contains(date_recorded) {
                continue;
            }

            let origin_url = match url::Url::parse(&self.base_url)
                .and_then(|base| base.join(href.as_str()))
            {
                Ok(joined) => joined.to_string(),
                Err(_) => href.as_str().to_string(),
            };

            let title = committee
                .as_deref()
                .map(|c| format!("{} - {}", c, link_text))
                .unwrap_or_else(|| link_text.to_string());

            videos.push(VideoMetadata {
                video_id,
                source: Source::House,
                filename,
                origin_url,
                stream_url: None,
                date_recorded,
                committee: committee.clone(),
                title: Some(title),
            });
        }

        videos
    }
}

#[async_trait]
impl VideoSource for HouseSource {
    fn source(&self) -> Source {
        Source::House
    }

    async fn discover(
        &self,
        window: &DateWindow,
        limit: Option<usize>,
    ) -> Result<Vec<VideoMetadata>> {
        let mut videos = Vec::new();

        // The archive is paginated by calendar year
        for year in window.start.year()..=window.end.year() {
            let html = match self.fetch_archive_for_year(year).await {
                Ok(html) => html,
                Err(e) => {
                    tracing::warn!("failed to fetch archive for year {}: {:#}", year, e);
                    continue;
                }
            };

            videos.extend(self.parse_archive_listing(&html, window));

            if limit.is_some_and(|limit| videos.len() >= limit) {
                break;
            }
        }

        if let Some(limit) = limit {
            videos.truncate(limit);
        }

        tracing::info!("discovered {} videos from the archive listing", videos.len());
        Ok(videos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const LISTING: &str = r#"
        <ul>
          <li>
            <strong>Agriculture | 2 Videos</strong>
            <ul>
              <li><a href="/VideoArchivePlayer?video=HAGRI-022025.mp4">Thursday, February 20, 2025</a></li>
              <li><a href="/VideoArchivePlayer?video=HAGRI-041625-2.mp4">Wednesday, April 16, 2025 - Part 2</a></li>
            </ul>
          </li>
          <li>
            <strong>Judiciary | 1 Video</strong>
            <ul>
              <li><a href="/VideoArchivePlayer?video=HJUDC-030525.mp4">Wednesday, March 5, 2025</a></li>
              <li><a href="/SomeOtherPage?x=1">Not a video link</a></li>
            </ul>
          </li>
        </ul>
    "#;

    fn source() -> HouseSource {
        HouseSource::new(
            "https://house.example/VideoArchive".to_string(),
            "https://house.example".to_string(),
        )
    }

    fn year_2025() -> DateWindow {
        DateWindow::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_parse_listing_extracts_videos_with_committees() {
        let videos = source().parse_archive_listing(LISTING, &year_2025());
        assert_eq!(videos.len(), 3);

        let first = &videos[0];
        assert_eq!(first.video_id, "HAGRI-022025");
        assert_eq!(first.filename, "HAGRI-022025.mp4");
        assert_eq!(first.source, Source::House);
        assert_eq!(first.committee.as_deref(), Some("Agriculture"));
        assert_eq!(
            first.origin_url,
            "https://house.example/VideoArchivePlayer?video=HAGRI-022025.mp4"
        );
        assert_eq!(
            first.title.as_deref(),
            Some("Agriculture - Thursday, February 20, 2025")
        );

        // Part suffix stripped for dates, committee tracked across headings
        assert_eq!(videos[1].video_id, "HAGRI-041625-2");
        assert_eq!(videos[2].committee.as_deref(), Some("Judiciary"));
    }

    #[test]
    fn test_parse_listing_filters_by_window() {
        let february_only = DateWindow::new(
            Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 2, 28, 0, 0, 0).unwrap(),
        );
        let videos = source().parse_archive_listing(LISTING, &february_only);
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].video_id, "HAGRI-022025");
    }

    #[test]
    fn test_parse_listing_ignores_non_video_links() {
        let videos = source().parse_archive_listing(LISTING, &year_2025());
        assert!(videos.iter().all(|v| v.origin_url.contains("VideoArchivePlayer")));
    }
}
