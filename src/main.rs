use anyhow::Result;
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gavel::cli::{resolve_window, Cli, Commands};
use gavel::config::Config;
use gavel::discovery::{DiscoveryService, HouseSource, SenateSource, VideoSource};
use gavel::pipeline::{
    AcquisitionPipeline, FfmpegExtractor, HttpDownloader, PipelineSettings, SegmentedDownloader,
    StrategyDownloader,
};
use gavel::resolver::{
    DisabledSniffer, HostedPlaybackApi, HouseResolver, HttpProber, ManifestSniffer,
    SenateResolver, StreamResolver, SubprocessSniffer, UrlProber,
};
use gavel::store::{Source, VideoStore};
use gavel::sweeper::RecoverySweeper;
use gavel::transcribe::provider_from_config;
use gavel::worker::{PipelineWorker, RunSummary};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gavel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Check for required external dependencies (non-fatal in Docker)
    let missing_deps = gavel::utils::check_dependencies().await;
    if !missing_deps.is_empty() && !cli.quiet {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing_deps {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - tools may be available)");
    }

    let config = Config::load().await?;

    match cli.command {
        Commands::Discover {
            days,
            start_date,
            end_date,
            source,
            limit,
            resolve_streams,
        } => {
            let window = resolve_window(
                days,
                start_date.as_deref(),
                end_date.as_deref(),
                config.discovery.lookback_days,
            )?;
            let source = parse_source(source)?;
            let store = open_store(&config)?;
            let service = build_discovery(&config);

            let resolvers = resolve_streams.then(|| build_resolvers(&config));
            let report = service
                .discover_and_register(&store, &window, source, limit, resolvers.as_ref())
                .await?;

            println!(
                "Discovered {} videos, {} newly registered",
                report.discovered, report.registered
            );
            for (source, count) in &report.per_source {
                println!("  {}: {} new", source, count);
            }
        }

        Commands::Run {
            days,
            start_date,
            end_date,
            source,
            limit,
            skip_discovery,
        } => {
            let window = resolve_window(
                days,
                start_date.as_deref(),
                end_date.as_deref(),
                config.discovery.lookback_days,
            )?;
            let source = parse_source(source)?;
            let store = open_store(&config)?;

            if !skip_discovery {
                let service = build_discovery(&config);
                let report = service
                    .discover_and_register(&store, &window, source, limit, None)
                    .await?;
                println!(
                    "Discovered {} videos, {} newly registered",
                    report.discovered, report.registered
                );
            }

            let worker = build_worker(&config, store.clone()).await?;

            // Ctrl-C abandons in-flight work; the sweeper reclaims the
            // records on a later pass
            let cancel = worker.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, cancelling in-flight work");
                    cancel.cancel();
                }
            });

            let spinner = (!cli.quiet).then(|| {
                let progress = ProgressBar::new_spinner();
                progress.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.green} [{elapsed_precise}] {msg}")
                        .unwrap(),
                );
                progress.set_message("Processing videos...");
                progress.enable_steady_tick(std::time::Duration::from_millis(120));
                progress
            });

            let summary = worker.run_window(Some(window), source, limit).await?;

            if let Some(spinner) = spinner {
                spinner.finish_and_clear();
            }
            print_summary(&summary);
        }

        Commands::Sweep { every } => {
            let store = open_store(&config)?;
            let worker = build_worker(&config, store.clone()).await?;
            let sweeper =
                RecoverySweeper::new(store.clone(), config.pipeline.stale_after_minutes);

            let cancel = worker.cancellation_token();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                }
            });

            loop {
                let (report, summary) = worker.run_sweep(&sweeper).await?;

                println!(
                    "Sweep: {} transcription retries, {} download restarts, {} stale reclaims",
                    report.requeued_transcriptions.len(),
                    report.restarted_downloads.len(),
                    report.reclaimed_stale
                );
                if report.is_empty() {
                    println!("Nothing to recover.");
                } else {
                    print_summary(&summary);
                }

                let Some(minutes) = every else { break };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_secs(minutes * 60)) => {}
                }
            }
        }

        Commands::Status => {
            let store = open_store(&config)?;
            let stats = store.stats()?;
            println!("Pipeline status:");
            println!("  Total videos:  {}", stats.total);
            println!("  Downloaded:    {}", stats.downloaded);
            println!("  Transcribed:   {}", stats.transcribed);
            println!("  Failed:        {}", stats.failed);

            let failed = store.list_failed()?;
            if !failed.is_empty() {
                println!("\nFailed records:");
                for record in failed.iter().take(20) {
                    println!(
                        "  {} ({}): {}",
                        record.video_id,
                        record.source,
                        record.last_error.as_deref().unwrap_or("no reason recorded")
                    );
                }
            }
        }

        Commands::Search { query } => {
            let store = open_store(&config)?;
            let hits = store.search(&query)?;

            if hits.is_empty() {
                println!("No transcripts match \"{}\"", query);
            } else {
                println!("{} matching transcript(s):\n", hits.len());
                for hit in &hits {
                    println!(
                        "{} {} [{}] {}",
                        hit.date_recorded.format("%Y-%m-%d"),
                        style(&hit.video_id).bold(),
                        hit.provider,
                        hit.title.as_deref().unwrap_or("")
                    );
                    println!("  {}\n", gavel::utils::excerpt(&hit.content, &query, 60));
                }
            }
        }

        Commands::Config { show } => {
            config.display();
            if !show {
                println!("\nOverride with DATABASE_PATH, STORAGE_PATH, TRANSCRIPTION_PROVIDER.");
            }
        }
    }

    Ok(())
}

fn parse_source(source: Option<String>) -> Result<Option<Source>> {
    source.map(|s| s.parse()).transpose()
}

fn open_store(config: &Config) -> Result<Arc<VideoStore>> {
    Ok(Arc::new(VideoStore::open(&config.database.path)?))
}

fn build_discovery(config: &Config) -> DiscoveryService {
    let sources: Vec<Arc<dyn VideoSource>> = vec![
        Arc::new(HouseSource::new(
            config.discovery.house_archive_url.clone(),
            config.discovery.house_base_url.clone(),
        )),
        Arc::new(SenateSource::new(
            config.discovery.senate_api_url.clone(),
            config.discovery.senate_player_base_url.clone(),
            config.resolution.senate_player_referer.clone(),
        )),
    ];
    DiscoveryService::new(sources)
}

fn build_resolvers(config: &Config) -> HashMap<Source, Arc<dyn StreamResolver>> {
    let sniffer: Arc<dyn ManifestSniffer> =
        match SubprocessSniffer::from_config(&config.resolution.sniffer) {
            Some(sniffer) => Arc::new(sniffer),
            None => Arc::new(DisabledSniffer),
        };
    let prober: Arc<dyn UrlProber> = Arc::new(HttpProber::new());

    let mut resolvers: HashMap<Source, Arc<dyn StreamResolver>> = HashMap::new();
    resolvers.insert(
        Source::House,
        Arc::new(HouseResolver::new(
            config.resolution.house_file_base_url.clone(),
            prober.clone(),
            sniffer.clone(),
        )),
    );
    resolvers.insert(
        Source::Senate,
        Arc::new(SenateResolver::new(
            config.resolution.senate_cdn_base_url.clone(),
            prober,
            Arc::new(HostedPlaybackApi::new(
                config.resolution.senate_playback_api_url.clone(),
                config.resolution.senate_org_id.clone(),
                config.resolution.senate_player_referer.clone(),
            )),
            sniffer,
        )),
    );
    resolvers
}

/// Some archives refuse transfers without the player page's Referer
fn referer_rules(config: &Config) -> Vec<(String, String)> {
    let mut rules = Vec::new();
    let house_referer = format!("{}/", config.discovery.house_base_url.trim_end_matches('/'));

    for url in [
        &config.resolution.house_file_base_url,
        &config.discovery.house_base_url,
    ] {
        if let Some(host) = host_of(url) {
            rules.push((host, house_referer.clone()));
        }
    }
    for url in [
        &config.resolution.senate_cdn_base_url,
        &config.discovery.senate_player_base_url,
    ] {
        if let Some(host) = host_of(url) {
            rules.push((host, config.resolution.senate_player_referer.clone()));
        }
    }
    rules
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}

async fn build_worker(config: &Config, store: Arc<VideoStore>) -> Result<PipelineWorker> {
    let downloader = StrategyDownloader::new(
        HttpDownloader::new(config.download.timeout_seconds),
        SegmentedDownloader::new(
            config.download.yt_dlp_path.clone(),
            config.download.concurrent_fragments,
            referer_rules(config),
        ),
    );
    let provider = provider_from_config(&config.transcription).await?;

    let pipeline = Arc::new(AcquisitionPipeline::new(
        store.clone(),
        build_resolvers(config),
        Arc::new(downloader),
        Arc::new(FfmpegExtractor::new()),
        provider,
        PipelineSettings::from_config(config),
    ));

    Ok(PipelineWorker::new(store, pipeline, &config.pipeline))
}

fn print_summary(summary: &RunSummary) {
    println!("\nPipeline run complete:");
    println!("  Processed: {}", summary.processed);
    println!("  {} {}", style("Succeeded:").green(), summary.succeeded);
    println!("  {} {}", style("Failed:").red(), summary.failed);
    for (video_id, source, reason) in &summary.failures {
        println!("    {} ({}): {}", video_id, source, reason);
    }
}
