mod agent;
mod capabilities;
mod cli;
mod client;
mod executor;

use clap::Parser;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.as_filter_str())),
        )
        .init();

    let node_id = cli.node_id.clone().unwrap_or_else(generate_node_id);
    let address = cli.address.clone().unwrap_or_else(detect_local_address);
    let config = agent::AgentConfig::from_cli(&cli, node_id, address);

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_cancel.cancel();
    });

    agent::run(config, cancel).await
}

/// `{hostname}-{8 hex chars}`.
fn generate_node_id() -> String {
    let mut bytes = [0u8; 4];
    rand::rng().fill(&mut bytes);
    format!("{}-{}", capabilities::hostname(), hex::encode(bytes))
}

/// Best-effort local address: connect a UDP socket to an address
/// outside the default route and read back the interface it bound
/// to. Never actually sends a packet.
fn detect_local_address() -> String {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
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
