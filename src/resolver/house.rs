use async_trait::async_trait;
use std::sync::Arc;

use super::{ManifestSniffer, ProbeOutcome, Resolution, ResolveTarget, StreamResolver, UrlProber};
use crate::store::Source;
use crate::Result;

/// Resolver for the House archive.
///
/// The archive stores finished recordings as plain MP4 files under a stable
/// naming convention, so the chain is: deterministic file URL with a HEAD
/// probe, then a browser sniff of the player page. There is no resolution
/// API for this source.
pub struct HouseResolver {
    file_base_url: String,
    prober: Arc<dyn UrlProber>,
    sniffer: Arc<dyn ManifestSniffer>,
}

impl HouseResolver {
    pub fn new(
        file_base_url: String,
        prober: Arc<dyn UrlProber>,
        sniffer: Arc<dyn ManifestSniffer>,
    ) -> Self {
        Self {
            file_base_url,
            prober,
            sniffer,
        }
    }

    fn direct_url(&self, target: &ResolveTarget) -> String {
        format!(
            "{}/{}",
            self.file_base_url.trim_end_matches('/'),
            target.filename
        )
    }
}

#[async_trait]
impl StreamResolver for HouseResolver {
    fn source(&self) -> Source {
        Source::House
    }

    async fn resolve(&self, target: &ResolveTarget) -> Result<Resolution> {
        let direct_url = self.direct_url(target);
        tracing::debug!("probing direct file URL: {}", direct_url);

        match self.prober.probe(&direct_url).await? {
            ProbeOutcome::Verified => {
                tracing::info!("direct file URL verified: {}", direct_url);
                return Ok(Resolution::Resolved(direct_url));
            }
            ProbeOutcome::Unverifiable => {
                // The archive frequently answers HEAD oddly even for files
                // that download fine; payload validation backstops this.
                tracing::warn!(
                    "could not verify direct URL, returning it anyway: {}",
                    direct_url
                );
                return Ok(Resolution::Resolved(direct_url));
            }
            ProbeOutcome::NotFound => {
                tracing::info!(
                    "direct file absent for {}, trying player page sniff",
                    target.video_id
                );
            }
        }

        if let Some(manifest_url) = self.sniffer.sniff(&target.origin_url).await? {
            tracing::info!("sniffed manifest URL for {}: {}", target.video_id, manifest_url);
            return Ok(Resolution::Resolved(manifest_url));
        }

        Ok(Resolution::Unresolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::sniffer::MockManifestSniffer;
    use crate::resolver::{test_target, MockUrlProber};

    fn resolver(prober: MockUrlProber, sniffer: MockManifestSniffer) -> HouseResolver {
        HouseResolver::new(
            "https://archive.example/files".to_string(),
            Arc::new(prober),
            Arc::new(sniffer),
        )
    }

    #[tokio::test]
    async fn test_verified_direct_url_wins() {
        let mut prober = MockUrlProber::new();
        prober
            .expect_probe()
            .withf(|url| url == "https://archive.example/files/HAGRI-022025.mp4")
            .times(1)
            .returning(|_| Ok(ProbeOutcome::Verified));
        let mut sniffer = MockManifestSniffer::new();
        sniffer.expect_sniff().times(0);

        let resolution = resolver(prober, sniffer)
            .resolve(&test_target("HAGRI-022025"))
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Resolved("https://archive.example/files/HAGRI-022025.mp4".to_string())
        );
    }

    #[tokio::test]
    async fn test_unverifiable_probe_is_optimistic() {
        let mut prober = MockUrlProber::new();
        prober
            .expect_probe()
            .times(1)
            .returning(|_| Ok(ProbeOutcome::Unverifiable));
        let mut sniffer = MockManifestSniffer::new();
        sniffer.expect_sniff().times(0);

        let resolution = resolver(prober, sniffer)
            .resolve(&test_target("HAGRI-022025"))
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Resolved(_)));
    }

    #[tokio::test]
    async fn test_absent_file_falls_back_to_sniffer() {
        let mut prober = MockUrlProber::new();
        prober
            .expect_probe()
            .times(1)
            .returning(|_| Ok(ProbeOutcome::NotFound));
        let mut sniffer = MockManifestSniffer::new();
        sniffer
            .expect_sniff()
            .withf(|url| url.contains("player?video=HAGRI-022025.mp4"))
            .times(1)
            .returning(|_| Ok(Some("https://cdn.example/hls/master.m3u8".to_string())));

        let resolution = resolver(prober, sniffer)
            .resolve(&test_target("HAGRI-022025"))
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Resolved("https://cdn.example/hls/master.m3u8".to_string())
        );
    }

    #[tokio::test]
    async fn test_exhausted_chain_is_unresolved_not_error() {
        let mut prober = MockUrlProber::new();
        prober
            .expect_probe()
            .times(1)
            .returning(|_| Ok(ProbeOutcome::NotFound));
        let mut sniffer = MockManifestSniffer::new();
        sniffer.expect_sniff().times(1).returning(|_| Ok(None));

        let resolution = resolver(prober, sniffer)
            .resolve(&test_target("HAGRI-022025"))
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Unresolved);
    }
}
