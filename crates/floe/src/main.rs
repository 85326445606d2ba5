//! Floe CLI: load extracted JSON documents into warehouse tables.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use floe::{CliArgs, Config, RunContext, init_tracing, run_units, shutdown_signal};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();

    let paths = args.config_paths();
    if paths.is_empty() {
        eprintln!("Error: no config files or directories specified");
        return ExitCode::FAILURE;
    }

    info!("Loading config from {} source(s)", paths.len());

    let mut config = match Config::from_paths(&paths) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = config.apply_environment_override(args.environment.as_deref()) {
        eprintln!("Invalid environment: {e}");
        return ExitCode::FAILURE;
    }
    if let Err(e) = config.select_units(&args.units) {
        eprintln!("Invalid unit selection: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        environment = config.global.environment.as_str(),
        "Starting floe with {} unit(s)",
        config.units.len()
    );
    for (key, unit) in &config.units {
        info!(
            "  Unit: {} ({} -> {}/tenant={})",
            key,
            unit.source_location,
            unit.table(),
            unit.tenant_id
        );
    }

    if config.metrics.enabled
        && let Err(e) = floe_core::metrics::init(&config.metrics.address)
    {
        eprintln!("Failed to start metrics endpoint: {e}");
        return ExitCode::FAILURE;
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    let ctx = match RunContext::from_config(&config, shutdown).await {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            eprintln!("Failed to initialize: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut failed = 0;
    for result in run_units(&config, ctx).await {
        let summary = match &result {
            Ok(summary) => summary,
            Err(failure) => {
                failed += 1;
                &failure.summary
            }
        };
        match serde_json::to_string(summary) {
            Ok(line) => println!("{line}"),
            Err(e) => error!(unit = %summary.unit, error = %e, "Failed to encode run summary"),
        }
    }

    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        eprintln!("{failed} unit(s) failed");
        ExitCode::FAILURE
    }
}
