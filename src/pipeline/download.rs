use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::{GavelError, Result};

/// Result of a completed transfer
#[derive(Debug, Clone, Copy)]
pub struct FetchOutcome {
    pub bytes_transferred: u64,
}

/// Moves bytes from a resolved URL to a destination path.
///
/// Atomic-or-absent: nothing may remain at the destination after a failed
/// fetch. Payload validation is the pipeline's job, not the downloader's.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<FetchOutcome>;
}

/// Whether a URL names segmented media that needs manifest assembly
pub fn is_manifest_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains(".m3u8") || lower.contains(".mpd") || lower.contains("videoarchiveplayer")
}

/// Picks the transfer strategy by URL shape: manifests go to the external
/// multi-connection downloader, direct files stream over HTTP.
pub struct StrategyDownloader {
    http: HttpDownloader,
    segmented: SegmentedDownloader,
}

impl StrategyDownloader {
    pub fn new(http: HttpDownloader, segmented: SegmentedDownloader) -> Self {
        Self { http, segmented }
    }
}

#[async_trait]
impl Downloader for StrategyDownloader {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<FetchOutcome> {
        if is_manifest_url(url) {
            self.segmented.fetch(url, dest).await
        } else {
            self.http.fetch(url, dest).await
        }
    }
}

const DOWNLOAD_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Streaming HTTP transfer for direct progressive files
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(timeout_seconds: u64) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(30))
                .timeout(Duration::from_secs(timeout_seconds))
                .build()
                .unwrap_or_default(),
        }
    }

    async fn transfer(&self, url: &str, dest: &Path) -> Result<FetchOutcome> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", DOWNLOAD_USER_AGENT)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.is_client_error() {
            // A 4xx on a freshly resolved URL means the URL is wrong, not
            // that the network hiccuped
            return Err(GavelError::InvalidPayload(format!(
                "download URL rejected with status {}",
                status
            ))
            .into());
        }
        if !status.is_success() {
            return Err(GavelError::Network(format!(
                "download failed with status {}",
                status
            ))
            .into());
        }

        let content_length = response.content_length();
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| GavelError::Network(format!("failed to create {}: {}", dest.display(), e)))?;
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify_reqwest_error)?;
            file.write_all(&chunk)
                .await
                .map_err(|e| GavelError::Network(format!("failed to write chunk: {}", e)))?;
            downloaded += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| GavelError::Network(format!("failed to flush file: {}", e)))?;

        if let Some(expected) = content_length {
            if downloaded != expected {
                return Err(GavelError::Network(format!(
                    "download incomplete: got {} bytes, expected {}",
                    downloaded, expected
                ))
                .into());
            }
        }

        tracing::debug!("transfer complete: {} bytes to {}", downloaded, dest.display());
        Ok(FetchOutcome {
            bytes_transferred: downloaded,
        })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<FetchOutcome> {
        if let Some(parent) = dest.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let result = self.transfer(url, dest).await;
        if result.is_err() {
            // Atomic-or-absent: never leave a partial file behind
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> anyhow::Error {
    if e.is_timeout() {
        GavelError::Timeout(format!("transfer timed out: {}", e)).into()
    } else {
        GavelError::Network(format!("transfer failed: {}", e)).into()
    }
}

/// External multi-connection downloader for HLS/DASH manifests.
///
/// Delegates to yt-dlp with aria2c fragment fan-out; the pipeline only sees
/// overall success or failure plus a byte count.
pub struct SegmentedDownloader {
    yt_dlp_path: String,
    concurrent_fragments: u32,
    /// (host substring, referer) pairs; the first match supplies the
    /// Referer/Origin headers some archives require
    referer_rules: Vec<(String, String)>,
}

impl SegmentedDownloader {
    pub fn new(
        yt_dlp_path: String,
        concurrent_fragments: u32,
        referer_rules: Vec<(String, String)>,
    ) -> Self {
        Self {
            yt_dlp_path,
            concurrent_fragments,
            referer_rules,
        }
    }

    fn referer_for(&self, url: &str) -> Option<&str> {
        self.referer_rules
            .iter()
            .find(|(host, _)| url.contains(host.as_str()))
            .map(|(_, referer)| referer.as_str())
    }

    /// yt-dlp sometimes appends its own extension; find what it produced
    async fn locate_output(&self, dest: &Path) -> Option<PathBuf> {
        if tokio::fs::metadata(dest).await.is_ok() {
            return Some(dest.to_path_buf());
        }
        for ext in ["mp4", "mkv", "webm"] {
            let alt = dest.with_extension(ext);
            if alt != dest && tokio::fs::metadata(&alt).await.is_ok() {
                if tokio::fs::rename(&alt, dest).await.is_ok() {
                    return Some(dest.to_path_buf());
                }
            }
        }
        None
    }
}

#[async_trait]
impl Downloader for SegmentedDownloader {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<FetchOutcome> {
        if let Some(parent) = dest.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let mut command = Command::new(&self.yt_dlp_path);
        command.args([
            "--output",
            &dest.to_string_lossy(),
            "--format",
            "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best",
            "--no-playlist",
            "--no-warnings",
            "--newline",
            "--concurrent-fragments",
            &self.concurrent_fragments.to_string(),
            "--external-downloader",
            "aria2c",
            "--external-downloader-args",
            "--min-split-size=1M --max-connection-per-server=16 --split=16 --retry-wait=2 --max-tries=5",
        ]);

        if let Some(referer) = self.referer_for(url) {
            command.args(["--referer", referer]);
        }
        command.arg(url);

        tracing::info!("starting segmented download: {}", url);
        let output = command
            .output()
            .await
            .map_err(|e| GavelError::Subprocess(format!("failed to run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let _ = tokio::fs::remove_file(dest).await;
            return Err(GavelError::Subprocess(format!(
                "yt-dlp failed: {}",
                stderr.lines().last().unwrap_or("unknown error")
            ))
            .into());
        }

        let Some(found) = self.locate_output(dest).await else {
            return Err(GavelError::Subprocess(
                "yt-dlp finished but produced no output file".to_string(),
            )
            .into());
        };

        let bytes = tokio::fs::metadata(&found)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        Ok(FetchOutcome {
            bytes_transferred: bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_manifest_url() {
        assert!(is_manifest_url("https://cdn.example/out.m3u8"));
        assert!(is_manifest_url("https://cdn.example/out.m3u8?sig=1"));
        assert!(is_manifest_url("https://cdn.example/dash/stream.mpd"));
        assert!(is_manifest_url(
            "https://house.example/VideoArchivePlayer?video=HAGRI-022025.mp4"
        ));
        assert!(!is_manifest_url("https://archive.example/files/HAGRI-022025.mp4"));
    }

    #[test]
    fn test_referer_rule_matching() {
        let downloader = SegmentedDownloader::new(
            "yt-dlp".to_string(),
            16,
            vec![
                ("house.example".to_string(), "https://house.example/".to_string()),
                ("cdn.example".to_string(), "https://player.example/vod/".to_string()),
            ],
        );
        assert_eq!(
            downloader.referer_for("https://cdn.example/outputs/x/out.m3u8"),
            Some("https://player.example/vod/")
        );
        assert_eq!(downloader.referer_for("https://elsewhere.example/a.mp4"), None);
    }
}
