//! Filebot - Main entry point.

use anyhow::Result;
use filebot_common::config::Config;
use filebot_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load_with_env()?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    config.validate()?;

    tracing::info!("Filebot v{}", env!("CARGO_PKG_VERSION"));

    filebot::run(config).await
}
