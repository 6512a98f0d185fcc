mod alerts;
mod anomaly;
mod cli;
mod config;
mod database;
mod error;
mod forecast;
mod ingest;
mod inventory;
mod pipeline;
mod pricing;
mod reports;
mod schema;
mod scoring;
mod summary;
mod validate;

use directories::ProjectDirs;
use flexi_logger::{Duplicate, FileSpec, Logger, LoggerHandle};
use log::{debug, error};

use crate::cli::Cli;
use crate::config::Config;
use crate::error::VendorPulseError;

fn init_logging(
    config: &Config,
    project_dirs: &ProjectDirs,
) -> Result<LoggerHandle, VendorPulseError> {
    let spec = format!("warn, vendorpulse={}", config.logging.vendorpulse);
    let handle = Logger::try_with_str(&spec)
        .map_err(|e| VendorPulseError::Error(format!("Failed to configure logging: {e}")))?
        .log_to_file(
            FileSpec::default()
                .directory(project_dirs.data_local_dir().join("logs"))
                .basename("vendorpulse"),
        )
        .duplicate_to_stderr(Duplicate::Warn)
        .start()
        .map_err(|e| VendorPulseError::Error(format!("Failed to start logging: {e}")))?;
    Ok(handle)
}

fn main() {
    let Some(project_dirs) = ProjectDirs::from("", "", "vendorpulse") else {
        eprintln!("Could not determine an application data directory.");
        std::process::exit(1);
    };

    let config = Config::load(&project_dirs);

    // Held for the life of the process; dropping it shuts the logger down
    let _logger = match init_logging(&config, &project_dirs) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    debug!(
        "Command-line args: {:?}",
        std::env::args_os().collect::<Vec<_>>()
    );

    if let Err(err) = Cli::handle_command_line(config, &project_dirs) {
        error!("{err:?}");
        eprintln!("{err}");
        std::process::exit(1);
    }
}
