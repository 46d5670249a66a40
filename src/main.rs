use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use leechfeed::config::Config;
use leechfeed::feed::HttpFetcher;
use leechfeed::filter::{DecisionCache, FeedFilter, VerificationScheduler};
use leechfeed::server::{create_router, spawn_sweeper, AppState, SWEEP_INTERVAL};

#[derive(Parser, Debug)]
#[command(
    name = "leechfeed",
    about = "RSS filtering proxy that keeps only freeleech, non-HR, size-capped tracker items"
)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, value_name = "FILE", default_value = "leechfeed.toml")]
    config: PathBuf,

    /// Listen port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("leechfeed=info,tower_http=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    // Task panics are already contained by tokio; make sure they reach the log.
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "Unhandled panic");
    }));

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let registry = config
        .build_registry()
        .context("Failed to build tracker registry")?;
    let client = HttpFetcher::build_client(&config.client_settings())
        .context("Failed to build HTTP client")?;
    let fetcher = HttpFetcher::new(client).with_retries(config.fetch_retries);

    let mut filter = FeedFilter::new(registry.clone(), Arc::new(fetcher.clone()))
        .with_decision_cache(Arc::new(DecisionCache::with_capacity(
            config.accepted_cache_capacity,
        )))
        .with_scheduler(VerificationScheduler::new(config.max_concurrent_check));
    if let Some(base) = &config.public_base_url {
        filter = filter.with_public_base_url(base.clone());
    }
    for (domain, policy) in config.site_policies().context("Invalid site config")? {
        if registry.lookup(&domain).is_err() {
            tracing::warn!(domain = %domain, "Site is configured but no tracker plugin supports it");
        }
        filter = filter.with_policy(&domain, policy);
    }
    let filter = Arc::new(filter);

    let _sweeper = spawn_sweeper(Arc::clone(&filter), SWEEP_INTERVAL);
    let app = create_router(AppState::new(filter, fetcher));

    let port = args.port.unwrap_or(config.port);
    let addr: SocketAddr = format!("{}:{}", config.bind, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.bind, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!(
        addr = %addr,
        trackers = registry.len(),
        sites = config.sites.len(),
        max_concurrent_check = config.max_concurrent_check,
        "Listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}
