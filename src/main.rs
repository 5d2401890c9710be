use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info, warn};

use weather_aggregator::config::AggregatorConfig;
use weather_aggregator::telemetry::init_tracing;
use weather_aggregator::{AggregatorError, ForecastKind, Services};

#[derive(Parser, Debug)]
#[command(name = "weather-aggregator")]
#[command(version, about = "Multi-provider weather aggregation with tiered caching")]
struct Cli {
    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long, env = "WXAGG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the background refresh scheduler until Ctrl-C
    Serve,
    /// Resolve a place (name or "lat,lon") and print its weather as JSON
    Lookup {
        place: String,
        #[arg(short, long, default_value = "current")]
        kind: ForecastKind,
    },
    /// Run one refresh cycle over every known location
    Refresh {
        #[arg(short, long)]
        kind: ForecastKind,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = AggregatorConfig::load_from_path(cli.config)
        .with_context(|| "Failed to load configuration")?;
    init_tracing(&config.logging);

    let services = Services::from_config(&config)?;

    match cli.command {
        Command::Serve => serve(&config, &services).await?,
        Command::Lookup { place, kind } => {
            if let Err(e) = lookup(&services, &place, kind).await {
                error!(error = %e, "Lookup failed");
                eprintln!("{}", e.user_message());
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Refresh { kind } => {
            let report = services.scheduler.run_cycle(kind).await.map_err(|e| {
                error!(error = %e, "Refresh cycle failed");
                anyhow::anyhow!(e.user_message())
            })?;
            println!(
                "{kind}: {} locations, {} refreshed, {} failed",
                report.locations, report.refreshed, report.failed
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn serve(config: &AggregatorConfig, services: &Services) -> Result<()> {
    if !config.scheduler.enabled {
        warn!("Scheduler is disabled in the configuration, nothing to do");
        return Ok(());
    }

    services.scheduler.start();
    info!("Scheduler running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .with_context(|| "Failed to listen for shutdown signal")?;

    info!("Shutting down, waiting for in-flight refreshes");
    services.scheduler.stop().await;
    Ok(())
}

async fn lookup(services: &Services, place: &str, kind: ForecastKind) -> Result<(), AggregatorError> {
    let location = services.resolver.resolve_str(place).await?;
    let forecast = services.orchestrator.get_kind(&location, kind).await?;

    let output = json!({
        "location": location,
        "forecast": forecast,
    });
    match serde_json::to_string_pretty(&output) {
        Ok(text) => println!("{text}"),
        Err(e) => warn!(error = %e, "Failed to render output"),
    }
    Ok(())
}
