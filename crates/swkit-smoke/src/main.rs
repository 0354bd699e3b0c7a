//! SwKit smoke harness.
//!
//! Registers a coordinator against a live origin, opens a page, and fetches a
//! list of URLs twice: once online and once with the network switched off.
//! Prints a JSON summary of what each fetch returned.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use clap::Parser;
use serde_json::json;
use swkit_common::{init_logging, LogConfig, LogFormat, OptionExt, ResultExt, SwKitError};
use swkit_net::{Fetcher, FetcherConfig, HttpFetcher, NetError, Request, Response};
use swkit_sw::{CoordinatorConfig, GlobalScope, ServiceWorkerContainer};
use tracing::{info, warn, Level};
use url::Url;

#[derive(Parser)]
#[command(name = "swkit-smoke")]
#[command(version, about = "Exercise the offline coordinator against a live origin")]
struct Cli {
    /// Coordinator config file (JSON).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Origin to serve, overriding the config.
    #[arg(long)]
    origin: Option<Url>,

    /// Log output format: pretty, compact or json.
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,

    /// Tracing filter directives, e.g. `swkit_sw=debug,reqwest=warn`.
    #[arg(long)]
    log_filter: Option<String>,

    /// Paths (or absolute URLs) to fetch, resolved against the origin.
    #[arg(default_values_t = ["/".to_string(), "/offline".to_string()])]
    urls: Vec<String>,
}

/// HTTP fetcher with a switch to simulate losing the network.
struct SwitchableFetcher {
    inner: HttpFetcher,
    offline: AtomicBool,
}

impl SwitchableFetcher {
    fn new(inner: HttpFetcher) -> Self {
        Self {
            inner,
            offline: AtomicBool::new(false),
        }
    }

    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for SwitchableFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Offline);
        }
        self.inner.fetch(request).await
    }
}

#[tokio::main]
async fn main() -> swkit_common::Result<()> {
    let cli = Cli::parse();
    let mut log = LogConfig::default().with_format(cli.log_format);
    if cli.verbose {
        log = log.with_level(Level::DEBUG);
        log.include_location = true;
    }
    if let Some(filter) = &cli.log_filter {
        log = log.with_filter(filter.as_str());
    }
    init_logging(log);

    let mut config = match &cli.config {
        Some(path) => CoordinatorConfig::load(path)
            .context(format!("loading config from {}", path.display()))?,
        None => CoordinatorConfig::default(),
    };
    if let Some(origin) = cli.origin {
        config.origin = origin;
    }

    let targets = cli
        .urls
        .iter()
        .map(|u| config.resolve(u))
        .collect::<Result<Vec<_>, _>>()?;

    let fetcher = Arc::new(SwitchableFetcher::new(HttpFetcher::new(
        FetcherConfig::default(),
    )?));
    let (container, mut events) = ServiceWorkerContainer::new(
        GlobalScope::with_quota(config.quota_bytes),
        fetcher.clone(),
    );

    let started = Instant::now();
    let origin = config.origin.clone();
    container.register(config).await?;
    let worker = container
        .active_id()
        .await
        .ok_or_not_found("active coordinator")?;
    info!(worker = %worker, elapsed_ms = started.elapsed().as_millis() as u64, "Coordinator active");

    let page = container.open_client(origin).await;

    let online = fetch_all(&container, &targets, &page).await;
    container.settle().await;

    fetcher.set_offline(true);
    let offline = fetch_all(&container, &targets, &page).await;

    let mut lifecycle = Vec::new();
    while let Ok(event) = events.try_recv() {
        lifecycle.push(format!("{event:?}"));
    }

    let summary = json!({
        "worker": worker.to_string(),
        "lifecycle": lifecycle,
        "online": online,
        "offline": offline,
    });
    let rendered = serde_json::to_string_pretty(&summary).context("rendering summary")?;
    println!("{rendered}");
    Ok(())
}

async fn fetch_all(
    container: &ServiceWorkerContainer,
    targets: &[Url],
    page: &str,
) -> Vec<serde_json::Value> {
    let mut results = Vec::with_capacity(targets.len());
    for url in targets {
        let started = Instant::now();
        let request = Request::navigate(url.clone());
        let outcome = match container.fetch(request, Some(page)).await {
            Ok(response) => json!({
                "url": url.as_str(),
                "status": response.status.as_u16(),
                "bytes": response.body.len(),
                "content_type": response.content_type(),
                "elapsed_ms": started.elapsed().as_millis() as u64,
            }),
            Err(e) => {
                let err = SwKitError::from(e);
                warn!(url = %url, error = %err, category = err.category(), "Fetch failed");
                json!({
                    "url": url.as_str(),
                    "error": err.to_string(),
                    "category": err.category(),
                    "retryable": err.is_retryable(),
                })
            }
        };
        results.push(outcome);
    }
    results
}
