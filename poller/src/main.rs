mod app;
mod dedupe;
mod engine;
mod fetch;
mod lifecycle;
mod model;
mod scheduler;
mod store;

use clap::{Parser, Subcommand};
use std::process;
use tracing::{error, info};
use trigger_core::config::StoreBackend;
use trigger_core::{telemetry, Config, Error};

#[derive(Parser)]
#[clap(name = "poller")]
#[clap(about = "Generic HTTP polling trigger with exactly-once admission", version)]
struct Cli {
    /// Stable key identifying this trigger instance in the cursor store
    #[clap(long, env = "TRIGGER_INSTANCE", default_value = "default")]
    instance: String,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the cursor table in Postgres
    Migrate,

    /// Enable the trigger: establish the marker baseline
    Enable,

    /// Disable the trigger: delete the persisted marker
    Disable,

    /// Fetch a bounded sample without touching the persisted marker
    Test,

    /// Run a single polling cycle and emit the new items
    Once,

    /// Run polling cycles continuously at the configured interval
    Run,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Fatal error");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    telemetry::init(&config.telemetry)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate => {
            if config.store.backend != StoreBackend::Postgres {
                return Err(
                    Error::Config("migrate requires the postgres store backend".into()).into(),
                );
            }
            info!("Creating cursor schema");
            let store = store::PgCursorStore::connect(&config.store).await?;
            store.ensure_schema().await?;
            info!("Schema ready");
        }

        Commands::Enable => {
            let app = app::App::new(config, cli.instance).await?;
            app.enable().await?;
        }

        Commands::Disable => {
            let app = app::App::new(config, cli.instance).await?;
            app.disable().await?;
        }

        Commands::Test => {
            let app = app::App::new(config, cli.instance).await?;
            let sample = app.test().await?;
            info!(items = sample.len(), "Fetched sample");
            for item in &sample {
                println!("{}", serde_json::to_string_pretty(&item.data)?);
            }
        }

        Commands::Once => {
            let app = app::App::new(config, cli.instance).await?;
            let emitted = app.once().await?;
            info!(emitted, "Cycle complete");
        }

        Commands::Run => {
            let app = app::App::new(config, cli.instance).await?;
            app.run_scheduler().await?;
        }
    }

    telemetry::shutdown();
    Ok(())
}
