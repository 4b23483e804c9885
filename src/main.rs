use rosbridge_shim::{AppError, MemoryStore, RosWrapper, Settings};
use dotenv::dotenv;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> rosbridge_shim::Result<()> {
    // Load environment variables
    dotenv().ok();

    let config = Settings::new()?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!(
        "Configuration loaded ({}): {} topics, {} services, {} actions",
        config.environment,
        config.topics.len(),
        config.services.len(),
        config.actions.len()
    );

    let store = Arc::new(MemoryStore::new());
    let wrapper = RosWrapper::from_settings(&config, store.clone());
    wrapper.connect().await?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    info!("Interrupted, closing connection");
    wrapper.shutdown().await;

    let state = store.snapshot().await;
    info!("Raised {} alerts during the session", state.alerts.len());
    Ok(())
}
