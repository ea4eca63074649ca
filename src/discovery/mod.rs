use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub mod house;
pub mod senate;

pub use house::HouseSource;
pub use senate::SenateSource;

use crate::resolver::{Resolution, ResolveTarget, StreamResolver};
use crate::store::{DateWindow, Source, VideoMetadata, VideoStore};
use crate::Result;

/// Queries one archive for videos recorded within a date window and
/// normalizes the results. Implementations isolate the fragile, site-specific
/// markup and JSON shapes so nothing downstream changes when a site does.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoSource: Send + Sync {
    fn source(&self) -> Source;

    async fn discover(
        &self,
        window: &DateWindow,
        limit: Option<usize>,
    ) -> Result<Vec<VideoMetadata>>;
}

/// Outcome of one discovery pass
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Everything the sources returned within the window
    pub discovered: usize,
    /// Videos seen for the first time and registered
    pub registered: usize,
    pub per_source: HashMap<Source, usize>,
}

/// Orchestrates discovery across all configured sources
pub struct DiscoveryService {
    sources: Vec<Arc<dyn VideoSource>>,
}

impl DiscoveryService {
    pub fn new(sources: Vec<Arc<dyn VideoSource>>) -> Self {
        Self { sources }
    }

    /// Query sources for the window, concurrently across sources. One source
    /// failing is logged and does not block the others.
    pub async fn discover(
        &self,
        window: &DateWindow,
        source_filter: Option<Source>,
        limit: Option<usize>,
    ) -> Vec<VideoMetadata> {
        let queries = self
            .sources
            .iter()
            .filter(|source| source_filter.is_none() || source_filter == Some(source.source()))
            .map(|source| async move {
                tracing::info!("discovering from {} archive...", source.source());
                (source.source(), source.discover(window, limit).await)
            });

        let mut all_videos = Vec::new();
        for (source, result) in futures_util::future::join_all(queries).await {
            match result {
                Ok(videos) => {
                    tracing::info!("found {} videos from {}", videos.len(), source);
                    all_videos.extend(videos);
                }
                Err(e) => {
                    tracing::error!("error discovering {} videos: {:#}", source, e);
                }
            }
        }

        all_videos
    }

    /// Discover and register unseen videos.
    ///
    /// Idempotent: an already-registered `(video_id, source)` is left
    /// completely untouched; stage fields are never reset by re-discovery.
    /// When `resolvers` is given, stream URLs are resolved eagerly at
    /// registration time (for UIs that want playability up front); by default
    /// resolution is deferred to the pipeline's download step.
    pub async fn discover_and_register(
        &self,
        store: &VideoStore,
        window: &DateWindow,
        source_filter: Option<Source>,
        limit: Option<usize>,
        resolvers: Option<&HashMap<Source, Arc<dyn StreamResolver>>>,
    ) -> Result<DiscoveryReport> {
        let videos = self.discover(window, source_filter, limit).await;

        let mut report = DiscoveryReport {
            discovered: videos.len(),
            ..Default::default()
        };

        for mut video in videos {
            if store.exists(&video.video_id, video.source)? {
                tracing::debug!(
                    "already registered, skipping: {} ({})",
                    video.video_id,
                    video.source
                );
                continue;
            }

            if let Some(resolvers) = resolvers {
                if let Some(resolver) = resolvers.get(&video.source) {
                    match resolver.resolve(&ResolveTarget::from(&video)).await {
                        Ok(Resolution::Resolved(url)) => video.stream_url = Some(url),
                        Ok(Resolution::Unresolved) => {
                            tracing::info!(
                                "eager resolution found no stream URL for {}",
                                video.video_id
                            );
                        }
                        Err(e) => {
                            tracing::warn!(
                                "eager resolution failed for {}: {:#}",
                                video.video_id,
                                e
                            );
                        }
                    }
                }
            }

            store.create(&video)?;
            report.registered += 1;
            *report.per_source.entry(video.source).or_insert(0) += 1;
        }

        tracing::info!(
            "discovery complete: {} found, {} newly registered",
            report.discovered,
            report.registered
        );
        Ok(report)
    }
}
