#![cfg(not(tarpaulin_include))]

use cardsort::app;
use cardsort::config::Config;
use tracing_subscriber::EnvFilter;

/// Main entry point for the web service
///
/// Initializes logging, loads the configuration from the environment and
/// runs the HTTP server until it is stopped.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cardsort=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        backend = ?config.backend,
        test_mode = config.test_mode,
        "starting card-sort processing service"
    );

    app::run(config).await
}
