//! abtgs-server - broadcast transcription microservice
//!
//! Accepts cloud-disk links or uploaded media, runs them through download,
//! transcoding, storage and diarized recognition with bounded concurrency, and
//! serves review and DOCX export over HTTP + SSE.
//!
//! `abtgs-server watch <ID>...` polls a running service instead of serving.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use abtgs_server::adapters::docx::DocxGenerator;
use abtgs_server::adapters::ffmpeg::FfmpegTranscoder;
use abtgs_server::adapters::s3_store::S3ObjectStore;
use abtgs_server::adapters::speechkit::SpeechKitRecognizer;
use abtgs_server::adapters::yandex_disk::YandexDiskFetcher;
use abtgs_server::adapters::StageAdapters;
use abtgs_server::config::{ServiceConfig, SERVICE_NAME};
use abtgs_server::services::{HttpStatusClient, PollOutcome, StatusPoller};
use abtgs_server::AppState;

/// Command-line arguments for abtgs-server
#[derive(Parser, Debug)]
#[command(name = "abtgs-server")]
#[command(about = "Broadcast transcription service")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "ABTGS_PORT")]
    port: Option<u16>,

    /// Address to bind (overrides the config file)
    #[arg(long, env = "ABTGS_HOST")]
    host: Option<String>,

    /// Root folder for scratch, upload and storage directories
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Path to the TOML config file
    #[arg(short, long, env = "ABTGS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll job status on a running service until it settles
    Watch {
        /// One id polls that job; several are polled as a batch
        #[arg(required = true)]
        ids: Vec<String>,

        /// Service base URL (defaults to the configured host and port)
        #[arg(long, env = "ABTGS_URL")]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServiceConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.host = host;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(&config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(Command::Watch { ids, url }) = args.command {
        let url = url.unwrap_or_else(|| format!("http://{}:{}", config.host, config.port));
        return watch(&config, &url, ids).await;
    }

    info!("Starting {} v{} ({})", SERVICE_NAME, env!("CARGO_PKG_VERSION"), env!("GIT_HASH"));

    let dirs = config.dirs(args.root_folder.as_deref());
    dirs.ensure().context("Failed to initialize root folder")?;
    info!("Root folder: {}", dirs.root.display());

    let transcoder = FfmpegTranscoder::new(config.ffmpeg_path.clone());
    match transcoder.check_available().await {
        Ok(version) => info!("ffmpeg available: {}", version),
        Err(e) => warn!("ffmpeg check failed, transcoding will fail until fixed: {}", e),
    }

    let adapters = StageAdapters {
        fetcher: Arc::new(
            YandexDiskFetcher::new(
                config.yandex_disk_api.clone(),
                config.max_file_size_bytes,
                config.allowed_extensions.clone(),
            )
            .context("Failed to create link fetcher")?,
        ),
        transcoder: Arc::new(transcoder),
        store: Arc::new(
            S3ObjectStore::new(config.object_storage_settings()?).context("Failed to create object store")?,
        ),
        recognizer: Arc::new(
            SpeechKitRecognizer::new(config.speechkit_settings()?)
                .context("Failed to create recognizer")?,
        ),
    };

    let addr = config.bind_addr()?;
    info!(
        max_concurrent_jobs = config.max_concurrent_jobs,
        candidates = config.candidates.len(),
        submissions_per_minute = config.create_rate_limit_per_minute,
        "Configuration ready"
    );

    let state = AppState::new(config, &dirs, adapters, Arc::new(DocxGenerator::new()));
    let app = abtgs_server::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Print status updates for `ids` until they settle or Ctrl+C
async fn watch(config: &ServiceConfig, url: &str, ids: Vec<String>) -> Result<()> {
    let client = HttpStatusClient::new(url).context("Failed to create status client")?;
    let poller = StatusPoller::new(config.poll_interval());
    let cancel = CancellationToken::new();

    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    info!(url, jobs = ids.len(), interval_ms = config.poll_interval_ms, "Watching");

    if let [id] = ids.as_slice() {
        let outcome = poller
            .poll_job(&client, id, &cancel, |update| match update {
                Ok(view) => {
                    let progress = view.progress_percent.map(|p| format!("{}%", p)).unwrap_or_default();
                    println!("{}  {}  {}", view.status, view.status_label, progress);
                }
                Err(e) => warn!("{}", e),
            })
            .await;
        return match outcome {
            PollOutcome::Finished(view) => match view.error {
                Some(error) => bail!("Job {} failed: {}", id, error),
                None => Ok(()),
            },
            PollOutcome::NotFound(id) => bail!("Job {} not found at {}", id, url),
            PollOutcome::Cancelled => Ok(()),
        };
    }

    let outcome = poller
        .poll_batch(&client, &ids, &cancel, |update| match update {
            Ok(view) => println!(
                "total {}  completed {}  errors {}  in progress {}",
                view.total, view.completed, view.errors, view.in_progress
            ),
            Err(e) => warn!("{}", e),
        })
        .await;
    match outcome {
        PollOutcome::Finished(view) if view.errors > 0 => bail!("{} of {} jobs did not complete", view.errors, view.total),
        _ => Ok(()),
    }
}

/// Filter used when RUST_LOG is unset
///
/// A bare level applies to this service and its HTTP layer; anything else is
/// taken as a full directive.
fn default_filter(level: &str) -> String {
    let level = level.trim();
    if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("abtgs_server={0},abtgs_common={0},tower_http={0}", level)
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
