use anyhow::Result;
use reqwest::Client;
use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, warn};

use user_relay::circuit_breaker::CircuitBreaker;
use user_relay::config::Config;
use user_relay::gateway::HttpUserGateway;
use user_relay::relay;
use user_relay::service::UserService;
use user_relay::state::AppState;

static DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_target(true)
        .compact()
        .init();

    // Load config
    let cfg_path = env::var("USR_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg_path = PathBuf::from(cfg_path);
    if !cfg_path.exists() {
        warn!("config file {} not found, using defaults", cfg_path.display());
    }
    let cfg = Config::load_or_default(&cfg_path)?;
    info!("db gateway at {}", cfg.db_gateway.base_url());

    let client = Client::builder()
        .pool_max_idle_per_host(32)
        .tcp_keepalive(Some(std::time::Duration::from_secs(10)))
        .build()?;
    let gateway = HttpUserGateway::new(client, cfg.db_gateway.base_url(), cfg.db_gateway.call_timeout());

    // One breaker per outbound dependency, owned by the service that uses it.
    let breaker = CircuitBreaker::new(cfg.breaker.settings());
    let users = UserService::new(Arc::new(gateway), breaker);

    let addr: SocketAddr = format!("{}:{}", cfg.server.bind_addr, cfg.server.port).parse()?;
    let app_state = Arc::new(AppState::new(cfg, users));
    let router = relay::router(app_state);

    info!("user service listening on http://{}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {:?}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
