// Hub service entry point.
use anyhow::Result;
use hub::config::Config;
use hub::observability;
use hub::server::Server;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let config = Config::from_env_or_yaml()?;
    let running = Server::new(config).start().await?;

    // Block until SIGINT, then drain and exit cleanly.
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down");
    running.stop().await;
    Ok(())
}
