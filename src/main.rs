use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use wrenchmode::config::Config;
use wrenchmode::gateway::GatewayServer;
use wrenchmode::upstream::{UpstreamClient, UpstreamConfig};
use wrenchmode::Wrenchmode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wrenchmode=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");

    // Credential fallback is resolved once, here
    let maintenance = config.wrenchmode.clone().resolve_jwt();
    let middleware = Arc::new(Wrenchmode::new(maintenance)?);
    if !middleware.is_enabled() {
        warn!(
            jwt_env = %config.wrenchmode.jwt_env,
            "No JWT configured, maintenance mode is disabled and all traffic passes through"
        );
    }

    print_startup_banner(&config, middleware.is_enabled());

    let upstream = Arc::new(UpstreamClient::new(UpstreamConfig {
        address: config.server.upstream.clone(),
        max_idle_per_host: config.server.pool_max_idle_per_host,
        idle_timeout: Duration::from_secs(config.server.pool_idle_timeout_secs),
    }));

    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let gateway = GatewayServer::new(bind_addr, middleware, upstream, shutdown_rx)
        .with_request_timeout(config.server.request_timeout());

    let gateway_handle = tokio::spawn(async move {
        if let Err(e) = gateway.run().await {
            error!(error = %e, "Gateway server error");
        }
    });

    wait_for_shutdown_signal().await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = gateway_handle.await {
        error!(error = %e, "Gateway task failed");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, only Ctrl+C will stop the gateway");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT (Ctrl+C), shutting down...");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}

fn print_startup_banner(config: &Config, enabled: bool) {
    let wm = &config.wrenchmode;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %format!("{}:{}", config.server.bind, config.server.port),
        upstream = %config.server.upstream,
        maintenance_enabled = enabled,
        status_url = %wm.status_url(),
        check_delay_secs = wm.check_delay_secs,
        force_open = wm.force_open,
        ignore_test_mode = wm.ignore_test_mode,
        reverse_proxy_disabled = wm.disable_reverse_proxy,
        trust_remote_ip = wm.trust_remote_ip,
        "wrenchmode-gate starting"
    );
}
