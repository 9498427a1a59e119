mod benchmark;
mod chart;
mod collectors;
mod config;
mod diagnostics;
mod http;
mod metrics;
mod platform;
mod provider;
mod report;
mod snapshot;
mod state;

use axum::serve;
use benchmark::{BenchmarkError, BenchmarkRunner};
use chart::{download_charts, ChartLinks};
use clap::Parser;
use config::Config;
use metrics::Metrics;
use report::{Host, Report};
use reqwest::Client;
use state::State;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cpuprobe")]
#[command(version)]
struct Cli {
    /// YAML config; built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    repetitions: Option<usize>,
    #[arg(long)]
    no_charts: bool,
    /// Keep running and expose the latest report over HTTP.
    #[arg(long)]
    serve: bool,
    #[arg(long)]
    print_default_config: bool,
    /// Single-line JSON output.
    #[arg(long)]
    compact: bool,
}

#[derive(Debug, Error)]
enum RunError {
    #[error("benchmark worker stopped: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Benchmark(#[from] BenchmarkError),
    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to initialise metrics: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("invalid listen address: {0}")]
    Listen(#[from] std::net::AddrParseError),
    #[error("http server: {0}")]
    Serve(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match load_config(&cli) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let result = if cli.serve {
        run_serve(cfg).await
    } else {
        run_once(&cfg, !cli.compact).await
    };
    if let Err(err) = result {
        error!(error = %err, "cpuprobe failed");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config, config::ConfigError> {
    let mut cfg = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    if let Some(repetitions) = cli.repetitions {
        cfg.repetitions = repetitions;
    }
    if cli.no_charts {
        cfg.charts.enabled = false;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn http_client() -> Client {
    Client::builder()
        .user_agent(concat!("cpuprobe/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Runs one benchmark on a blocking worker. The host is handed back through
/// `slot` so its samplers keep their previous CPU reading between runs.
async fn collect_report(
    slot: &mut Option<Host>,
    cfg: &Config,
) -> Result<(Report, Option<ChartLinks>), RunError> {
    let mut host = slot.take().unwrap_or_else(Host::new);
    let runner = BenchmarkRunner::new(cfg.repetitions, cfg.cooldown);
    let (host, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = host.run_benchmark(&runner);
        (host, outcome)
    })
    .await?;
    *slot = Some(host);
    let outcome = outcome?;

    let links = if cfg.charts.enabled {
        match ChartLinks::for_summary(&outcome.summary, &cfg.charts.base_url) {
            Ok(links) => Some(links),
            Err(err) => {
                warn!(error = %err, "chart links unavailable");
                None
            }
        }
    } else {
        None
    };
    let report = Report::new(outcome, links.as_ref());
    Ok((report, links))
}

async fn run_once(cfg: &Config, pretty: bool) -> Result<(), RunError> {
    let mut host = None;
    let (report, links) = collect_report(&mut host, cfg).await?;

    if let (Some(links), Some(dir)) = (&links, &cfg.charts.download_dir) {
        let client = http_client();
        if let Err(err) = download_charts(&client, links, dir, cfg.chart_timeout()).await {
            warn!(error = %err, dir = %dir.display(), "chart download failed");
        }
    }

    println!("{}", report.to_json(pretty)?);
    Ok(())
}

async fn run_serve(cfg: Config) -> Result<(), RunError> {
    info!(
        listen = %cfg.serve.listen,
        interval = %humantime::format_duration(cfg.serve.interval),
        repetitions = cfg.repetitions,
        "starting cpuprobe service"
    );

    let shared_state = Arc::new(RwLock::new(State::new(now_unix())));
    let metrics = Metrics::new()?;
    let addr: SocketAddr = cfg.serve.listen.parse()?;
    let listener = TcpListener::bind(addr).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let app = http::build_router(metrics.clone(), shared_state.clone());
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(err) = server.await {
                error!(error = %err, "http server error");
            }
        })
    };

    let collector_task = {
        let metrics = metrics.clone();
        let shared_state = shared_state.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut host = None;
            let mut ticker = tokio::time::interval(cfg.serve.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("stopping benchmark loop");
                        break;
                    }
                    _ = ticker.tick() => {
                        match collect_report(&mut host, &cfg).await {
                            Ok((report, _)) => {
                                let mut guard = shared_state.write().await;
                                guard.record_run(now_unix(), report);
                                metrics.update_from_state(&guard);
                                info!(runs = guard.runs_completed, "benchmark run recorded");
                            }
                            Err(err) => error!(error = %err, "benchmark run failed"),
                        }
                    }
                }
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = collector_task.await;
    let _ = http_task.await;
    Ok(())
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
