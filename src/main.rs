use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use pairgate::cli::{Cli, Command, run_request_command};
use pairgate::config::PairingConfig;
use pairgate::http::{PairingServer, router};
use pairgate::pairing::{FsCredentialStore, LoopbackConnector, LoopbackScript, PairingService};

/// The loopback transport confirms the link on its own after this long.
const LOOPBACK_LINK_AFTER: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    init_tracing(cli.log_json);
    std::panic::set_hook(Box::new(|info| {
        tracing::error!("Panic: {}", info);
    }));

    match cli.command {
        Some(Command::Request { ref number, ref url }) => run_request_command(number, url).await,
        _ => Ok(serve(cli.port_override()).await?),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pairgate=info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

async fn serve(port: Option<u16>) -> pairgate::Result<()> {
    let mut config = PairingConfig::from_env()?;
    if let Some(port) = port {
        config.port = port;
    }

    tracing::info!(
        addr = %config.bind_addr(),
        session_dir = %config.session_dir.display(),
        namespace = %config.session_namespace,
        deadline_secs = config.timings.deadline.as_secs(),
        "Starting pairing gateway"
    );

    let store = Arc::new(FsCredentialStore::new(config.session_dir.clone()));
    let connector = Arc::new(LoopbackConnector::new(LoopbackScript {
        auto_link_after: Some(LOOPBACK_LINK_AFTER),
        ..LoopbackScript::default()
    }));
    let service = Arc::new(PairingService::new(&config, connector, store));

    let mut server = PairingServer::new(config.bind_addr());
    server.start(router(Arc::clone(&service))).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    if service.shutdown().await {
        tracing::info!("Active pairing session released");
    }
    server.shutdown().await;

    Ok(())
}
