use crate::config::parse::{load_config, ConfigError};
use crate::source::naming::SystemClock;
use crate::supervisor::Supervisor;
use crate::upload::{UploadError, Uploader};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to build uploader: {0}")]
    Uploader(#[from] UploadError),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ./config.yml");
            eprintln!("  ./config.json");
            eprintln!("  ~/.config/tailship/config.yml");
            eprintln!("  /etc/tailship/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'tailship config init' to generate one.");
            std::process::exit(1);
        }
    };

    match run_shipper(&config_path, crate::cli::signal::wait_for_shutdown()).await {
        Ok(()) => Ok(()),
        Err(RunError::Config(e)) => {
            eprintln!("Error: invalid config {}:\n{}", config_path.display(), e);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

/// Load the config at `config_path` and ship logs until `shutdown` resolves.
pub async fn run_shipper<F>(config_path: &Path, shutdown: F) -> Result<(), RunError>
where
    F: Future<Output = ()>,
{
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    let uploader = Uploader::from_config(&config)?;
    info!(
        url = %uploader.url(),
        app = %config.app,
        sources = config.files.len(),
        line_num = config.line_num,
        "Configuration loaded"
    );

    let supervisor = Supervisor::new(&config, Arc::new(uploader), Arc::new(SystemClock));
    let report = supervisor.run(shutdown).await;

    if report.timed_out.is_empty() {
        info!(stopped = report.stopped, "Shutdown complete");
    } else {
        warn!(
            stopped = report.stopped,
            timed_out = ?report.timed_out,
            "Shutdown complete, some watches were aborted"
        );
    }
    Ok(())
}
