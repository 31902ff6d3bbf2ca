//! etcd-bootstrap - builds the static pod for this node's etcd member.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Loads the bootstrap configuration
//! - Resolves etcd membership (joining an existing cluster if configured)
//! - Prints the resulting static pod manifest as YAML on stdout

use std::path::PathBuf;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use etcd_bootstrap::{BootstrapConfig, bootstrap_local_etcd};

/// Environment variable naming the configuration file
const CONFIG_ENV: &str = "ETCD_BOOTSTRAP_CONFIG";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout carries only the manifest
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("etcd_bootstrap=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    let cfg = match config_path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            BootstrapConfig::load(&path)?
        }
        None => {
            warn!("No configuration given, using defaults");
            BootstrapConfig::default()
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Received shutdown signal, cancelling bootstrap");
            cancel.cancel();
        });
    }

    let pod = match bootstrap_local_etcd(&cfg, &cancel).await {
        Ok(pod) => pod,
        Err(e) => {
            error!(error = %e, "etcd bootstrap failed");
            return Err(e.into());
        }
    };

    print!("{}", serde_yaml::to_string(&pod)?);
    info!("etcd static pod generated");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// A handler that cannot be installed never fires; the other one still can.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
