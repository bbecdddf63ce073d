use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use mcp_bridge::{BridgeConfig, BridgeService, SessionManager, Spawner, VersionInfo, transport};

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("MCP_BRIDGE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("mcp_bridge={base_level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = BridgeConfig::from_env()
        .inspect_err(|e| error!(error = %e, "Invalid configuration"))?;
    let spawner = Arc::new(config.spawner());
    let version = VersionInfo::new().with_server_command(spawner.describe());

    info!(
        command = %spawner.describe(),
        call_timeout = ?config.session.call_timeout,
        "Configuring MCP session"
    );

    let service = Arc::new(
        BridgeService::new(SessionManager::new(spawner, config.session.clone()))
            .with_version(version),
    );

    // Start the child eagerly, without holding up the listener. A failure
    // here is not fatal: the first request retries the spawn.
    let warm = Arc::clone(&service);
    tokio::spawn(async move {
        match warm.session().warm_up().await {
            Ok(()) => info!("MCP server started"),
            Err(e) => warn!(error = %e, "MCP server did not start; will retry on first request"),
        }
    });

    transport::serve(config.server, service).await
}
