use async_trait::async_trait;
use std::sync::Arc;

use super::{
    strip_signing_params, ManifestSniffer, PlaybackApi, ProbeOutcome, Resolution, ResolveTarget,
    StreamResolver, UrlProber,
};
use crate::store::Source;
use crate::Result;

/// Resolver for the Senate hosting provider.
///
/// Chain, cheapest first: the CDN output pattern the provider publishes HLS
/// renditions under, then the playback API that signs URLs for the web
/// player, then a browser sniff of the player page. Signed URLs are stripped
/// of their single-use query parameters before being persisted.
pub struct SenateResolver {
    cdn_base_url: String,
    prober: Arc<dyn UrlProber>,
    api: Arc<dyn PlaybackApi>,
    sniffer: Arc<dyn ManifestSniffer>,
}

impl SenateResolver {
    pub fn new(
        cdn_base_url: String,
        prober: Arc<dyn UrlProber>,
        api: Arc<dyn PlaybackApi>,
        sniffer: Arc<dyn ManifestSniffer>,
    ) -> Self {
        Self {
            cdn_base_url,
            prober,
            api,
            sniffer,
        }
    }

    fn pattern_url(&self, video_id: &str) -> String {
        format!(
            "{}/{}/Default/HLS/out.m3u8",
            self.cdn_base_url.trim_end_matches('/'),
            video_id
        )
    }
}

#[async_trait]
impl StreamResolver for SenateResolver {
    fn source(&self) -> Source {
        Source::Senate
    }

    async fn resolve(&self, target: &ResolveTarget) -> Result<Resolution> {
        let pattern_url = self.pattern_url(&target.video_id);
        tracing::debug!("probing CDN pattern URL: {}", pattern_url);

        if self.prober.probe(&pattern_url).await? == ProbeOutcome::Verified {
            tracing::info!("CDN pattern URL verified: {}", pattern_url);
            return Ok(Resolution::Resolved(pattern_url));
        }

        // The API call is still cheap; unlike the chamber archive there is no
        // point guessing when the provider will sign a URL for us.
        match self.api.signed_url(&target.video_id).await {
            Ok(Some(signed)) => {
                let stream_url = strip_signing_params(&signed);
                tracing::info!("playback API resolved {}: {}", target.video_id, stream_url);
                return Ok(Resolution::Resolved(stream_url));
            }
            Ok(None) => {
                tracing::info!("playback API had no URL for {}", target.video_id);
            }
            Err(e) => {
                tracing::warn!("playback API failed for {}: {}", target.video_id, e);
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
    use crate::resolver::{test_target, MockPlaybackApi, MockUrlProber};

    fn resolver(
        prober: MockUrlProber,
        api: MockPlaybackApi,
        sniffer: MockManifestSniffer,
    ) -> SenateResolver {
        SenateResolver::new(
            "https://cdn.example/outputs".to_string(),
            Arc::new(prober),
            Arc::new(api),
            Arc::new(sniffer),
        )
    }

    #[tokio::test]
    async fn test_verified_pattern_skips_api() {
        let mut prober = MockUrlProber::new();
        prober
            .expect_probe()
            .withf(|url| url == "https://cdn.example/outputs/abc123/Default/HLS/out.m3u8")
            .times(1)
            .returning(|_| Ok(ProbeOutcome::Verified));
        let mut api = MockPlaybackApi::new();
        api.expect_signed_url().times(0);
        let mut sniffer = MockManifestSniffer::new();
        sniffer.expect_sniff().times(0);

        let resolution = resolver(prober, api, sniffer)
            .resolve(&test_target("abc123"))
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Resolved("https://cdn.example/outputs/abc123/Default/HLS/out.m3u8".to_string())
        );
    }

    // The deterministic URL 404s once, the API answers, and the deterministic
    // step is not retried within the attempt.
    #[tokio::test]
    async fn test_api_url_wins_after_pattern_404() {
        let mut prober = MockUrlProber::new();
        prober
            .expect_probe()
            .times(1)
            .returning(|_| Ok(ProbeOutcome::NotFound));
        let mut api = MockPlaybackApi::new();
        api.expect_signed_url()
            .withf(|id| id == "abc123")
            .times(1)
            .returning(|_| {
                Ok(Some(
                    "https://cdn.example/signed/out.m3u8?Expires=1&Signature=xyz".to_string(),
                ))
            });
        let mut sniffer = MockManifestSniffer::new();
        sniffer.expect_sniff().times(0);

        let resolution = resolver(prober, api, sniffer)
            .resolve(&test_target("abc123"))
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Resolved("https://cdn.example/signed/out.m3u8".to_string()),
            "single-use signing parameters must be stripped before persisting"
        );
    }

    #[tokio::test]
    async fn test_api_failure_falls_through_to_sniffer() {
        let mut prober = MockUrlProber::new();
        prober
            .expect_probe()
            .times(1)
            .returning(|_| Ok(ProbeOutcome::Unverifiable));
        let mut api = MockPlaybackApi::new();
        api.expect_signed_url()
            .times(1)
            .returning(|_| Err(crate::GavelError::Network("503".to_string()).into()));
        let mut sniffer = MockManifestSniffer::new();
        sniffer
            .expect_sniff()
            .times(1)
            .returning(|_| Ok(Some("https://cdn.example/hls/index.m3u8".to_string())));

        let resolution = resolver(prober, api, sniffer)
            .resolve(&test_target("abc123"))
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Resolved("https://cdn.example/hls/index.m3u8".to_string())
        );
    }

    #[tokio::test]
    async fn test_full_chain_exhaustion_is_unresolved() {
        let mut prober = MockUrlProber::new();
        prober
            .expect_probe()
            .times(1)
            .returning(|_| Ok(ProbeOutcome::NotFound));
        let mut api = MockPlaybackApi::new();
        api.expect_signed_url().times(1).returning(|_| Ok(None));
        let mut sniffer = MockManifestSniffer::new();
        sniffer.expect_sniff().times(1).returning(|_| Ok(None));

        let resolution = resolver(prober, api, sniffer)
            .resolve(&test_target("abc123"))
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Unresolved);
    }
}
