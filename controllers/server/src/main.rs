//! Server Controller
//!
//! Realizes Minecraft `Server` CRDs as Pods.
//!
//! For every Server the controller makes sure one Pod running the server
//! image exists (creating it, or adopting one it already owns) and records
//! that Pod's name and whether it is running in the Server status.

mod backoff;
mod config;
mod controller;
mod error;
mod ownership;
mod pod_factory;
mod reconciler;
mod store;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Installs the ring provider kube's rustls client needs.
///
/// Returns false if a provider was already installed, which serves as well.
fn install_crypto_provider() -> bool {
    let installed = rustls::crypto::ring::default_provider().install_default().is_ok();
    if !installed {
        debug!("rustls crypto provider already installed");
    }
    installed
}

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    install_crypto_provider();

    info!("Starting Server Controller");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Concurrency: {}", config.concurrency);
    info!("  Debounce: {}s", config.debounce.as_secs());
    info!(
        "  Error backoff: {}m..{}m",
        config.backoff_min_minutes, config.backoff_max_minutes
    );

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
