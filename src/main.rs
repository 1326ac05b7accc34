use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollbooth::config::TollboothConfig;
use tollbooth::http::{HttpServer, RateLimitLayerState};
use tollbooth::jobs::{self, JobQueue};
use tollbooth::ratelimit::{Clock, ExpiryPolicy, MonotonicClock};

/// Command line arguments. Flags override the config file and environment.
#[derive(Parser, Debug)]
#[command(name = "tollbooth")]
#[command(about = "HTTP service with an in-process fixed-window rate limiter")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Rate limit window in milliseconds
    #[arg(long)]
    window_ms: Option<u64>,

    /// Requests allowed per window
    #[arg(long)]
    max_requests: Option<u64>,

    /// Expiry policy: lazy or fixed_lifetime
    #[arg(long)]
    expiry: Option<ExpiryPolicy>,

    /// Sweep interval in milliseconds, 0 to disable
    #[arg(long)]
    sweep_interval_ms: Option<u64>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn apply(&self, config: &mut TollboothConfig) {
        if let Some(listen) = self.listen {
            config.server.listen_addr = listen;
        }
        if let Some(window_ms) = self.window_ms {
            config.rate_limiting.window_ms = window_ms;
        }
        if let Some(max_requests) = self.max_requests {
            config.rate_limiting.max_requests = max_requests;
        }
        if let Some(expiry) = self.expiry {
            config.rate_limiting.expiry = expiry;
        }
        if let Some(sweep_interval_ms) = self.sweep_interval_ms {
            config.rate_limiting.sweep_interval_ms = sweep_interval_ms;
        }
        if self.log_json {
            config.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = TollboothConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    init_tracing(&config);

    info!("Starting Tollbooth");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        info!(path = %path.display(), "Loaded configuration file");
    }
    info!(
        listen_addr = %config.server.listen_addr,
        window_ms = config.rate_limiting.window_ms,
        max_requests = config.rate_limiting.max_requests,
        expiry = ?config.rate_limiting.expiry,
        key_source = ?config.rate_limiting.key_source,
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock);
    let limiter = Arc::new(config.rate_limiting.build_limiter());
    let sweeper = config
        .rate_limiting
        .sweep_interval()
        .map(|interval| limiter.spawn_sweeper(clock.clone(), interval));

    let extractor = config
        .rate_limiting
        .key_source
        .extractor(&config.rate_limiting.key_header);
    let limit = RateLimitLayerState::new(limiter, clock, extractor);

    let (queue, jobs_rx) = JobQueue::new(config.jobs.queue_capacity);
    let worker = jobs::spawn_worker(jobs_rx);

    let server = HttpServer::new(config.server.listen_addr, limit, queue);
    server.serve_with_shutdown(shutdown_signal()).await?;

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }
    // The router, and with it the last queue sender, is gone by now.
    let stats = worker.await?;
    info!(
        processed = stats.processed,
        failed = stats.failed,
        "Tollbooth stopped"
    );
    Ok(())
}

fn init_tracing(config: &TollboothConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
