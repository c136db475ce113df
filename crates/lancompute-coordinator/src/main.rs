mod error;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use lancompute_core::model::{DEFAULT_HEARTBEAT_TIMEOUT_SECS, DEFAULT_NODE_CONCURRENCY_LIMIT};
use lancompute_core::{scheduler, Coordinator};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "lancompute-coordinator", about = "Coordinator for a LAN compute cluster")]
struct Cli {
    /// Address to bind the HTTP API to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the HTTP API to
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Seconds of missed heartbeats before a node is marked offline
    #[arg(long, default_value_t = DEFAULT_HEARTBEAT_TIMEOUT_SECS)]
    heartbeat_timeout: u64,

    /// Maximum concurrent tasks accepted per node
    #[arg(long, default_value_t = DEFAULT_NODE_CONCURRENCY_LIMIT)]
    node_concurrency_limit: usize,

    /// Logging verbosity, falls back to RUST_LOG if unset
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.as_filter_str())),
        )
        .init();

    let coordinator = Arc::new(Coordinator::with_limits(
        cli.heartbeat_timeout,
        cli.node_concurrency_limit,
    ));

    let cancel = CancellationToken::new();
    let scheduler_handle = tokio::spawn(scheduler::run(Arc::clone(&coordinator), cancel.clone()));

    let app = routes::build_router(Arc::clone(&coordinator));
    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    tracing::info!("lancompute-coordinator listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_cancel.cancel();
        })
        .await?;

    scheduler_handle.await?;
    tracing::info!("lancompute-coordinator shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
