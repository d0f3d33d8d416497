use anyhow::{Context, Result};
use chat_loadsim::{Config, Scenario, ScenarioRunner};
use clap::Parser;
use tracing::{error, info, warn};

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    let settings = config.settings()?;
    let scenario = config.scenario();

    // Print banner
    info!("════════════════════════════════════════════════════════════");
    info!("              CHAT LOAD SIMULATOR (Rust)");
    info!("════════════════════════════════════════════════════════════");
    info!("API: {}", settings.api_url);
    info!("WebSocket: {}", settings.ws_url);
    match scenario {
        Scenario::BasicInteraction { users } => {
            info!("Scenario 1: basic interaction");
            info!("Users: {}", users);
            info!("Rounds: {}", settings.rounds);
        }
        Scenario::MessageFlood { users, messages } => {
            info!("Scenario 2: message flood");
            info!("Users: {}", users);
            info!("Messages per user: {}", messages);
        }
    }
    info!("════════════════════════════════════════════════════════════");

    let runner = ScenarioRunner::new(settings).context("Failed to build HTTP client")?;

    let run = tokio::select! {
        run = runner.run(scenario) => run,
        _ = tokio::signal::ctrl_c() => {
            warn!("Simulation interrupted by user");
            return Ok(());
        }
    };

    if let Some(abort) = &run.abort {
        error!("Scenario did not complete: {}", abort);
    }

    let report = run.metrics.report();
    for line in report.to_string().lines() {
        info!("{}", line);
    }

    if let Some(path) = &config.report_json {
        report.write_json(path)?;
        info!("Report written to {:?}", path);
    }

    info!("════════════════════════════════════════════════════════════");
    info!(
        "        SIMULATION COMPLETE in {:.1}s",
        run.elapsed.as_secs_f64()
    );
    info!("════════════════════════════════════════════════════════════");

    Ok(())
}
