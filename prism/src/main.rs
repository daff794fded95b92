/*
prism - HTTP service binary
This binary loads configuration, wires the analysis coordinator and serves it over Rocket.
*/

use clap::Parser;
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use prism::coordinator::Coordinator;
use prism::llm;
use prism::server::{launch_rocket, AppState};

#[derive(Parser, Debug)]
#[command(name = "prism", about = "Prism article analysis service")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = match Config::load(args.config.as_deref()).await {
        Ok(cfg) => {
            info!(config = ?args.config, "configuration loaded");
            cfg
        }
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };

    let model = llm::create_model_service(config.llm.as_ref())?;
    let coordinator = Coordinator::from_config(&config, model)?;
    info!(
        types = ?coordinator.registry().type_ids(),
        budget = coordinator.budget_size(),
        "coordinator ready"
    );

    let state = AppState::new(Arc::new(config), Arc::new(coordinator));
    if let Err(e) = launch_rocket(state).await {
        error!(%e, "Rocket server failed");
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}
