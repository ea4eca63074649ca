use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{ChildStdout, Command};
use tokio::sync::Semaphore;

use crate::config::SnifferConfig;
use crate::{GavelError, Result};

/// Watches a player page through a headless browser until a manifest URL
/// shows up in its network traffic.
///
/// Browser internals stay outside the core: implementations only promise to
/// hand back the first usable manifest URL, or None when the bounded wait
/// window closes empty.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ManifestSniffer: Send + Sync {
    async fn sniff(&self, player_url: &str) -> Result<Option<String>>;
}

/// Falls through the resolution chain without ever launching a browser
pub struct DisabledSniffer;

#[async_trait]
impl ManifestSniffer for DisabledSniffer {
    async fn sniff(&self, player_url: &str) -> Result<Option<String>> {
        tracing::debug!("browser sniffing disabled, skipping {}", player_url);
        Ok(None)
    }
}

/// Drives an external headless-browser command against a player page.
///
/// The command receives the player URL as its last argument and is expected
/// to print every observed network request URL on its own stdout line. Each
/// invocation holds a full browser process, so a small semaphore caps
/// concurrency and a hard timeout guarantees the process never outlives its
/// window (`kill_on_drop` releases it even when the future is abandoned).
pub struct SubprocessSniffer {
    command: Vec<String>,
    poll_window: u64,
    hard_timeout: Duration,
    permits: Arc<Semaphore>,
}

impl SubprocessSniffer {
    /// Returns None when no sniffer command is configured
    pub fn from_config(config: &SnifferConfig) -> Option<Self> {
        let command = config.command.clone()?;
        if command.is_empty() {
            return None;
        }
        Some(Self {
            command,
            poll_window: config.poll_seconds.max(1),
            hard_timeout: Duration::from_secs(config.timeout_seconds.max(1)),
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
        })
    }

    async fn observe(&self, player_url: &str) -> Result<Option<String>> {
        let mut child = Command::new(&self.command[0])
            .args(&self.command[1..])
            .arg(player_url)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                GavelError::Subprocess(format!("failed to spawn sniffer {}: {}", self.command[0], e))
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            GavelError::Subprocess("sniffer stdout unavailable".to_string())
        })?;
        let mut lines = BufReader::new(stdout).lines();

        let mut candidates: Vec<String> = Vec::new();
        let mut eof = false;

        // One-second polls over the bounded wait window; stop early once a
        // master/index-named manifest shows up.
        for _ in 0..self.poll_window {
            drain_lines(&mut lines, &mut candidates, &mut eof).await;
            if candidates.iter().any(|c| is_preferred_name(c)) || eof {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        drain_lines(&mut lines, &mut candidates, &mut eof).await;

        let _ = child.kill().await;
        Ok(pick_manifest_url(&candidates))
    }
}

#[async_trait]
impl ManifestSniffer for SubprocessSniffer {
    async fn sniff(&self, player_url: &str) -> Result<Option<String>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| GavelError::Subprocess("sniffer pool closed".to_string()))?;

        tracing::info!("sniffing manifest URL from player page: {}", player_url);
        match tokio::time::timeout(self.hard_timeout, self.observe(player_url)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "sniffer timed out after {:?} on {}",
                    self.hard_timeout,
                    player_url
                );
                Ok(None)
            }
        }
    }
}

/// Pull whatever output has already arrived without blocking the poll loop
async fn drain_lines(
    lines: &mut Lines<BufReader<ChildStdout>>,
    candidates: &mut Vec<String>,
    eof: &mut bool,
) {
    loop {
        match tokio::time::timeout(Duration::from_millis(20), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                let line = line.trim();
                if is_manifest_candidate(line) {
                    candidates.push(line.to_string());
                }
            }
            Ok(Ok(None)) | Ok(Err(_)) => {
                *eof = true;
                break;
            }
            Err(_) => break, // nothing buffered right now
        }
    }
}

fn is_manifest_candidate(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains(".m3u8") || lower.contains(".mpd")
}

fn is_preferred_name(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains("master") || lower.contains("index")
}

/// Prefer the first master/index-named candidate, then the first seen at all
pub(crate) fn pick_manifest_url(candidates: &[String]) -> Option<String> {
    candidates
        .iter()
        .find(|c| is_preferred_name(c))
        .or_else(|| candidates.first())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_manifest_url_prefers_master_and_index() {
        let candidates = vec![
            "https://cdn.example/seg/0001.m3u8".to_string(),
            "https://cdn.example/hls/master.m3u8".to_string(),
            "https://cdn.example/hls/index.m3u8".to_string(),
        ];
        assert_eq!(
            pick_manifest_url(&candidates).as_deref(),
            Some("https://cdn.example/hls/master.m3u8")
        );
    }

    #[test]
    fn test_pick_manifest_url_falls_back_to_first() {
        let candidates = vec![
            "https://cdn.example/a.m3u8".to_string(),
            "https://cdn.example/b.m3u8".to_string(),
        ];
        assert_eq!(
            pick_manifest_url(&candidates).as_deref(),
            Some("https://cdn.example/a.m3u8")
        );
        assert_eq!(pick_manifest_url(&[]), None);
    }

    #[test]
    fn test_is_manifest_candidate() {
        assert!(is_manifest_candidate("https://cdn.example/out.m3u8?sig=1"));
        assert!(is_manifest_candidate("https://cdn.example/dash/out.MPD"));
        assert!(!is_manifest_candidate("https://cdn.example/player.js"));
    }

    #[tokio::test]
    async fn test_disabled_sniffer_returns_none() {
        let sniffer = DisabledSniffer;
        assert_eq!(sniffer.sniff("https://example.com/player").await.unwrap(), None);
    }

    #[test]
    fn test_from_config_requires_command() {
        let mut config = SnifferConfig::default();
        assert!(SubprocessSniffer::from_config(&config).is_none());

        config.command = Some(vec![]);
        assert!(SubprocessSniffer::from_config(&config).is_none());

        config.command = Some(vec!["sniff-browser".to_string(), "--headless".to_string()]);
        assert!(SubprocessSniffer::from_config(&config).is_some());
    }

    #[tokio::test]
    async fn test_subprocess_sniffer_reads_candidates_from_stdout() {
        // Use a shell as the stand-in browser: it prints a few observed URLs
        let config = SnifferConfig {
            command: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo 'https://cdn.example/player.js'; \
                 echo 'https://cdn.example/hls/master.m3u8'; \
                 echo 'https://cdn.example/seg/0001.m3u8' # ".to_string(),
            ]),
            poll_seconds: 3,
            timeout_seconds: 10,
            concurrency: 1,
        };
        let sniffer = SubprocessSniffer::from_config(&config).unwrap();
        let found = sniffer.sniff("https://archive.example/player?video=x").await.unwrap();
        assert_eq!(found.as_deref(), Some("https://cdn.example/hls/master.m3u8"));
    }
}
