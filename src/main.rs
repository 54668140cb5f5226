use devgate::assets::AssetServer;
use devgate::config::Config;
use devgate::plugin;
use devgate::pool::PoolConfig;
use devgate::router::Router;
use devgate::server::DevServer;
use devgate::{PKG_NAME, VERSION};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("devgate=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration; a missing file means defaults, like running with
    // zero config in a fresh project
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("devgate.toml"));

    let config = if config_path.exists() {
        let config = Config::load(&config_path).map_err(|e| {
            error!(path = %config_path.display(), error = %e, "Failed to load configuration");
            e
        })?;
        info!(path = %config_path.display(), "Configuration loaded");
        config
    } else {
        warn!(path = %config_path.display(), "No configuration file found, using defaults");
        Config::default()
    };

    print_startup_banner(&config);

    // Resolve plugin names against the built-in registry
    let plugins = plugin::resolve(&config.plugins).map_err(|e| {
        error!(error = %e, "Failed to resolve plugins");
        anyhow::anyhow!(e)
    })?;

    // Resolve the proxy map into a route table
    let router = Router::from_config(&config.server.proxy)?;
    for route in router.routes() {
        info!(
            prefix = %route.prefix,
            target = %route.authority,
            change_origin = route.change_origin,
            ws = route.ws,
            "Proxy rule"
        );
    }

    let assets = AssetServer::new(config.server.root.clone(), config.server.spa_fallback);

    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    let pool_config = PoolConfig {
        max_idle_per_host: config.server.pool_max_idle_per_host,
        idle_timeout: config.server.pool_idle_timeout(),
    };

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = DevServer::new(bind_addr, router, assets, plugins, shutdown_rx)
        .with_pool_config(pool_config)
        .with_request_timeout(config.server.request_timeout());

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Dev server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

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
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown and wait for the server to drain (with timeout)
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting dev server");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        root = %config.server.root,
        spa_fallback = config.server.spa_fallback,
        "Server configuration"
    );
    info!(
        request_timeout_secs = config.server.request_timeout_secs,
        pool_max_idle = config.server.pool_max_idle_per_host,
        pool_idle_timeout_secs = config.server.pool_idle_timeout_secs,
        "Request handling settings"
    );
    info!(
        plugins = ?config.plugins,
        "Configured plugins"
    );
}
