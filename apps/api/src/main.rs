use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use resumify_api::cache::CacheClient;
use resumify_api::config::Config;
use resumify_api::logging::init_service_logging;
use resumify_api::routes::build_router;
use resumify_api::server_config::ServerConfig;
use resumify_api::state::AppState;

/// Resumify API service.
#[derive(Debug, Parser)]
#[command(name = "resumify-api", version)]
struct Args {
    /// Server settings file (bind address, timeouts, access log).
    #[arg(long, default_value = "server.toml")]
    config: PathBuf,

    /// Runtime worker threads; overrides `workers` from the settings file.
    #[arg(long)]
    workers: Option<u16>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration first; malformed values abort startup
    let config = Config::from_env()?;
    let server = ServerConfig::load(&args.config)?.with_overrides(args.workers, config.port);

    let _log_guards = init_service_logging(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(usize::from(server.workers))
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    runtime.block_on(serve(config, server))
}

async fn serve(config: Config, server: ServerConfig) -> Result<()> {
    info!(
        "Starting Resumify API v{} ({} environment, {} workers)",
        env!("CARGO_PKG_VERSION"),
        config.environment,
        server.workers
    );

    if config.environment.is_production() && config.uses_default_secret() {
        warn!("SECRET_KEY is not set; using the development default in production");
    }
    if config.debug {
        warn!("DEBUG is enabled; logging at DEBUG level");
    }
    if config.huggingface_api_token.is_none() || config.openai_api_key.is_none() {
        warn!("HUGGINGFACE_API_TOKEN or OPENAI_API_KEY is unset; enrichment calls will fail");
    }

    tokio::fs::create_dir_all(&config.upload_folder)
        .await
        .with_context(|| format!("Failed to create upload folder {}", config.upload_folder.display()))?;

    // Redis is optional: an unusable URL or a failed ping only disables caching
    let cache = match CacheClient::open(&config.redis_url, config.redis_max_memory.clone()) {
        Ok(client) => {
            let client = client.with_ttl(config.cache_ttl());
            match client.ping().await {
                Ok(()) => info!("Successfully connected to Redis"),
                Err(e) => warn!("Failed to connect to Redis: {e}"),
            }
            Some(client)
        }
        Err(e) => {
            warn!("Invalid REDIS_URL, running without cache: {e}");
            None
        }
    };

    let state = AppState {
        config: Arc::new(config),
        cache,
    };

    let app = build_router(state, &server);

    let listener = tokio::net::TcpListener::bind(server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", server.bind))?;
    info!("Listening on {}", server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(server.graceful_shutdown()))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM, then arms a hard deadline for draining
/// in-flight requests.
async fn shutdown_signal(grace: std::time::Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining for up to {grace:?}");
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        warn!("Graceful shutdown window elapsed, exiting");
        std::process::exit(0);
    });
}
