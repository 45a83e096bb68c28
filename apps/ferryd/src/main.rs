//! fileferry relay daemon entry point.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting ferryd");

    let config_path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: ferryd <config.json>"))?;
    let relay_config = config::load(config_path.as_ref())?;
    tracing::info!(
        watch_dir = %relay_config.watch_dir.display(),
        method = ?relay_config.method,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(relay_config))?;

    tracing::info!("ferryd shut down cleanly");
    Ok(())
}
