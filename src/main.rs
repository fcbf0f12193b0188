//! Leasebox - Short-lived VMs and containers with enforced runtimes
//!
//! Starts the expiry monitor and reads operator commands from stdin, one per
//! line, replying with JSON on stdout.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use single_instance::SingleInstance;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use leasebox::core::{AppState, Settings};
use leasebox::shell::{self, Command};
use leasebox::{APP_NAME, APP_VERSION};

#[derive(Parser)]
#[command(name = "leasebox")]
#[command(version, about = "Short-lived VMs and containers with enforced runtimes", long_about = None)]
struct Cli {
    /// Settings file (JSON); defaults to the user config directory
    #[arg(long, env = leasebox::core::settings::CONFIG_ENV, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = Settings::resolve_path(cli.config);
    let settings = Settings::load(&config_path)
        .with_context(|| format!("Failed to load settings from {}", config_path.display()))?;

    // Initialize logging
    init_logging(settings.debug_logging);

    info!("{} v{} starting...", APP_NAME, APP_VERSION);

    // Two managers would fight over the same containers and pids
    let instance = SingleInstance::new(APP_NAME)
        .map_err(|e| anyhow::anyhow!("Failed to create single instance lock: {}", e))?;
    if !instance.is_single() {
        error!("Another instance of {} is already running!", APP_NAME);
        return Ok(());
    }

    let state = AppState::new(&settings);
    info!(
        config = %config_path.display(),
        vm_images = settings.vm_images.len(),
        container_images = settings.container_images.len(),
        "Application state initialized"
    );

    let monitor = state.spawn_expiry_monitor(settings.expiry_check_interval());
    info!(
        "Expiry monitor running every {}s",
        settings.expiry_check_interval_secs
    );

    run_shell(&state).await?;

    monitor.abort();
    let left = state.running_count();
    if left > 0 {
        warn!("{} instance(s) still running at shutdown", left);
    }
    info!("{} shutting down", APP_NAME);
    Ok(())
}

/// Initialize the logging system
fn init_logging(debug: bool) {
    let default = if debug { "leasebox=debug" } else { "leasebox=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Read commands from stdin until EOF or `quit`
async fn run_shell(state: &AppState) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", shell::HELP);

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let command = match shell::parse_line(line) {
            Ok(command) => command,
            Err(e) => {
                let message = e.render().to_string();
                println!("{}", serde_json::json!({ "error": "parse_error", "message": message.trim() }));
                continue;
            }
        };
        let quit = matches!(command, Command::Quit);

        let reply = shell::execute(state, command).await;
        println!("{}", reply);

        if quit {
            break;
        }
    }

    Ok(())
}
