use syncbridge::error::HostError;
use syncbridge::logger::initialize as LoggerInitialize;
use syncbridge::supervisor;

use common::ErrorLocation;

use sync_core::config::HostConfig;

use std::fs::create_dir_all;
use std::panic::Location;
use std::path::PathBuf;
use std::process::exit;

use log::info;
use tokio::signal::ctrl_c;
use tokio_util::sync::CancellationToken;

const APP_DIR_NAME: &str = "syncbridge";

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Exiting: {e}");
        exit(1);
    }
}

async fn run() -> Result<(), HostError> {
    let app_dir = app_dir()?;
    create_dir_all(&app_dir).map_err(|e| HostError::Host {
        message: format!("Failed to create app directory: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    LoggerInitialize(&app_dir)?;

    info!("SyncBridge host starting");
    info!("App directory: {}", app_dir.display());

    let config = HostConfig::load(&app_dir)?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    supervisor::run(config, shutdown).await
}

fn app_dir() -> Result<PathBuf, HostError> {
    let base = dirs::data_local_dir().ok_or_else(|| HostError::Host {
        message: "No local data directory available on this platform".to_string(),
        location: ErrorLocation::from(Location::caller()),
    })?;

    Ok(base.join(APP_DIR_NAME))
}
