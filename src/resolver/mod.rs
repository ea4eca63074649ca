use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

pub mod house;
pub mod senate;
pub mod sniffer;

pub use house::HouseResolver;
pub use senate::SenateResolver;
pub use sniffer::{DisabledSniffer, ManifestSniffer, SubprocessSniffer};

use crate::store::{Source, VideoMetadata, VideoRecord};
use crate::{GavelError, Result};

/// Outcome of one pass over a source's fallback chain.
///
/// `Unresolved` is not a hard failure: the caller records it and retries
/// resolution on a later pass instead of hammering the expensive steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(String),
    Unresolved,
}

/// The minimal record view a resolver needs
#[derive(Debug, Clone)]
pub struct ResolveTarget {
    pub video_id: String,
    pub filename: String,
    pub origin_url: String,
}

impl From<&VideoRecord> for ResolveTarget {
    fn from(record: &VideoRecord) -> Self {
        Self {
            video_id: record.video_id.clone(),
            filename: record.filename.clone(),
            origin_url: record.origin_url.clone(),
        }
    }
}

impl From<&VideoMetadata> for ResolveTarget {
    fn from(video: &VideoMetadata) -> Self {
        Self {
            video_id: video.video_id.clone(),
            filename: video.filename.clone(),
            origin_url: video.origin_url.clone(),
        }
    }
}

/// Turns discovery metadata into a stream URL the downloader can fetch
/// without further negotiation.
///
/// Every call walks the source's fallback chain cheapest-first; a previously
/// resolved URL is never assumed valid once a download using it has failed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamResolver: Send + Sync {
    fn source(&self) -> Source;

    async fn resolve(&self, target: &ResolveTarget) -> Result<Resolution>;
}

/// What a HEAD probe learned about a candidate URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The URL answers with a plausible video payload
    Verified,
    /// The URL affirmatively does not exist
    NotFound,
    /// The probe could not tell (network error, odd content type)
    Unverifiable,
}

/// Cheap existence probe for deterministically constructed URLs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UrlProber: Send + Sync {
    async fn probe(&self, url: &str) -> Result<ProbeOutcome>;
}

/// Exchanges an opaque video id for a signed playback URL
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlaybackApi: Send + Sync {
    async fn signed_url(&self, video_id: &str) -> Result<Option<String>>;
}

const PROBE_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// reqwest-backed [`UrlProber`]
pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UrlProber for HttpProber {
    async fn probe(&self, url: &str) -> Result<ProbeOutcome> {
        let response = match self
            .client
            .head(url)
            .header("User-Agent", PROBE_USER_AGENT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("HEAD probe failed for {}: {}", url, e);
                return Ok(ProbeOutcome::Unverifiable);
            }
        };

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(ProbeOutcome::NotFound);
        }
        if !status.is_success() {
            return Ok(ProbeOutcome::Unverifiable);
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|ct| ct.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        let content_length = response
            .headers()
            .get("content-length")
            .and_then(|cl| cl.to_str().ok())
            .and_then(|cl| cl.parse::<u64>().ok())
            .unwrap_or(0);

        if content_type.contains("video")
            || content_type.contains("mp4")
            || content_type.contains("mpegurl")
            || content_length > 0
        {
            Ok(ProbeOutcome::Verified)
        } else {
            Ok(ProbeOutcome::Unverifiable)
        }
    }
}

/// reqwest-backed [`PlaybackApi`] for the hosted archive's upload/get endpoint
pub struct HostedPlaybackApi {
    client: Client,
    api_url: String,
    org_id: String,
    referer: String,
}

impl HostedPlaybackApi {
    pub fn new(api_url: String, org_id: String, referer: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_url,
            org_id,
            referer,
        }
    }
}

#[async_trait]
impl PlaybackApi for HostedPlaybackApi {
    async fn signed_url(&self, video_id: &str) -> Result<Option<String>> {
        let origin = url::Url::parse(&self.referer)
            .ok()
            .and_then(|u| {
                u.host_str()
                    .map(|host| format!("{}://{}", u.scheme(), host))
            })
            .unwrap_or_else(|| self.referer.clone());
        let body = serde_json::json!({
            "file": video_id,
            "type": "HLS",
            "user": self.org_id,
        });

        let response = self
            .client
            .post(&self.api_url)
            .header("User-Agent", PROBE_USER_AGENT)
            .header("Referer", &self.referer)
            .header("Origin", origin)
            .json(&body)
            .send()
            .await
            .map_err(|e| GavelError::Network(format!("playback API request failed: {}", e)))?;

        if !response.status().is_success() {
            tracing::warn!(
                "playback API returned {} for {}",
                response.status(),
                video_id
            );
            return Ok(None);
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GavelError::Network(format!("playback API body unreadable: {}", e)))?;

        Ok(data["response"]["payload"]["data"]
            .as_str()
            .map(|s| s.to_string()))
    }
}

/// Strip query-string signing parameters before persisting a URL for reuse.
/// The signed form is single-use; the bare path stays retrievable within a
/// session.
pub fn strip_signing_params(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.split('?').next().unwrap_or(url).to_string(),
    }
}

#[cfg(test)]
pub(crate) fn test_target(video_id: &str) -> ResolveTarget {
    ResolveTarget {
        video_id: video_id.to_string(),
        filename: format!("{}.mp4", video_id),
        origin_url: format!("https://archive.example/player?video={}.mp4", video_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_signing_params() {
        assert_eq!(
            strip_signing_params("https://cdn.example/out.m3u8?Expires=1&Signature=abc"),
            "https://cdn.example/out.m3u8"
        );
        assert_eq!(
            strip_signing_params("https://cdn.example/out.m3u8"),
            "https://cdn.example/out.m3u8"
        );
        // Unparseable input falls back to a plain split
        assert_eq!(strip_signing_params("not a url?x=1"), "not a url");
    }
}
