// src/bin/tessera.rs

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::{sync::Arc, time::Duration};
use tessera::{
    cli::{self, Cli, NarrateCommand, RunEnd},
    runtime::RuntimeBuilder,
    system::{
        config::load_engine_config,
        implementation::{DefaultImplementation, Implementation},
    },
};

/// Sets up logging, runs the script and maps failures to exit codes.
#[tokio::main]
async fn main() {
    env_logger::init();

    match run(Cli::parse()).await {
        Ok(RunEnd::Idle) => {}
        // Interrupted by Ctrl+C: exit like a shell would.
        Ok(RunEnd::Interrupted) => std::process::exit(130),
        Err(e) => {
            eprintln!("\n{}: {:#}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<RunEnd> {
    log::debug!("CLI args parsed: {:?}", cli);

    let config = load_engine_config(cli.config.as_deref()).context("Failed to load engine config")?;
    let tick_rate = Duration::from_millis(config.tick_rate_ms.max(1));
    let implementation: Arc<dyn Implementation> = Arc::new(DefaultImplementation::new(config));

    let runtime = RuntimeBuilder::new(implementation)
        .with_builtins()
        .command(Arc::new(NarrateCommand))
        .build()?;

    let script = cli::load_script(&cli.script)?;
    let options = cli::fire_options(&cli)?;
    let fired = runtime.fire_script(script, options)?;
    log::info!("Started queue '{}'.", fired.queue_id);

    let end = cli::drive(&runtime, tick_rate).await;

    let outcome = fired
        .outcome
        .or_else(|| runtime.take_outcome(fired.correlation_id));
    if let Some(values) = outcome {
        for value in values {
            println!("{} {}", "determined:".green().bold(), value);
        }
    }
    Ok(end)
}
