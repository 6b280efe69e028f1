//! hawkBit Agent - Entry Point
//!
//! Long-lived update agent for hawkBit's Direct Device Integration API.
//! Polls the server for deployments, downloads and verifies software
//! bundles, and hands them to the configured installer.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use hawkagent::app::run::{run, RunOptions};
use hawkagent::installer::ExecInstaller;
use hawkagent::logs::init_logging;
use hawkagent::settings::Settings;
use hawkagent::system::power::SystemPower;

use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "/etc/hawkagent/config.json";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        println!("hawkagent {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    // Retrieve the settings file
    let config_path = cli_args
        .get("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let settings = match Settings::load(&config_path).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!(
                "Unable to read settings file {}: {}",
                config_path.display(),
                e
            );
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    if let Err(e) = init_logging(settings.log_level) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let options = RunOptions {
        run_once: cli_args.contains_key("once"),
    };

    let installer = Arc::new(ExecInstaller::new(settings.install_command.clone()));

    info!("Running hawkBit agent against {}", settings.hawkbit_server);
    let result = run(
        settings,
        installer,
        Arc::new(SystemPower),
        options,
        await_shutdown_signal(),
    )
    .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Agent failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).unwrap();
        let mut sigint = signal(SignalKind::interrupt()).unwrap();

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
