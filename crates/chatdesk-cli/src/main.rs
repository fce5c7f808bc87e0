//! Chatdesk CLI entry point

use std::path::Path;

use clap::Parser;
use tracing::{error, info};

use chatdesk_cli::{
    app::ChatdeskApp,
    cli::Cli,
    commands::CommandDispatcher,
    config::{AppConfig, Overrides},
    error::Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            setup_logging(cli.verbose);
            error!("{}", e);
            std::process::exit(1);
        }
    };

    setup_logging(config.cli.verbose);

    let app = match ChatdeskApp::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = CommandDispatcher::execute(cli, app).await {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("Chatdesk CLI exited successfully");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Layer file, environment and command line settings
fn load_configuration(cli: &Cli) -> Result<AppConfig> {
    let overrides = Overrides {
        verbose: cli.verbose.then_some(true),
        api_base_url: cli.api_url.clone(),
        realtime_url: cli.realtime_url.clone(),
        data_dir: cli.data_dir.clone(),
    };
    let config = AppConfig::load_with_overrides(cli.config.as_deref().map(Path::new), overrides)?;
    Ok(config)
}
