use std::sync::Arc;

use filegate::config::Config;
use filegate::sys_server::core::run_server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "startup configuration failed");
            std::process::exit(1);
        }
    };
    tracing::info!(store_root = %config.store_root.display(), "store root ready");

    if let Err(e) = run_server(Arc::new(config)).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
