//! # API Load Generator - Main Entry Point
//!
//! The main function performs these key operations:
//! 1. **Parse arguments** and optionally print an example configuration
//! 2. **Initialize logging** with the colorized console formatter
//! 3. **Load configuration** from file, apply overrides and validate it
//! 4. **Run** the rate controller while the reporter logs snapshots
//! 5. **Report**: print the final report, write it as JSON and upload it
//!
//! Ctrl-C cancels the run early; in-flight requests still get the shutdown
//! grace period and the final report is produced as usual.

use anyhow::{Context, Result};
use api_loadgen::{
    cli::Args,
    config::LoadConfig,
    defaults, logging,
    results::{ResultsManager, RunContext},
    utils::generate_run_id,
    HttpApiClient, LoadGenerator, MetricsAggregator, RateController, Reporter,
};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        println!("{}", LoadConfig::example_json()?);
        return Ok(());
    }

    let _log_guard = logging::init(args.verbose, args.quiet, args.log_file.as_deref())?;

    let mut config = match &args.config {
        Some(path) => LoadConfig::load_or_default(path),
        None => LoadConfig::default(),
    };
    config.apply_overrides(&args);
    config.validate().context("Invalid configuration")?;
    let policy = config.admission_policy()?;

    let run_id = generate_run_id();
    info!("Starting API Load Generator {} (run {})", api_loadgen::VERSION, run_id);
    info!("{}", config);

    let metrics = Arc::new(MetricsAggregator::start(
        config.queue_capacity,
        Duration::from_millis(defaults::METRICS_DRAIN_GRACE_MS),
    ));
    let client = HttpApiClient::new(&config.server_url, config.request_timeout())
        .context("Failed to build HTTP client")?;
    let generator = Arc::new(LoadGenerator::new(
        Arc::new(client),
        Arc::new(config.payload_generator()),
        Arc::clone(&metrics),
        config.weights,
    ));
    let controller = RateController::new(policy, generator, config.shutdown_grace());

    let ctx = CancellationToken::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping early");
                interrupt.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    let reporter_cancel = ctx.child_token();
    let reporter = tokio::spawn(
        Reporter::new(Arc::clone(&metrics)).run(config.report_interval(), reporter_cancel.clone()),
    );

    info!("Running for {:?}", config.duration());
    let summary = controller.run_for(&ctx, config.duration()).await?;

    reporter_cancel.cancel();
    if let Err(e) = reporter.await {
        error!("Reporter task failed: {}", e);
    }
    metrics.shutdown().await;

    let report = metrics.final_report(RunContext {
        run_id,
        mode: config.mode,
        target: config.target(),
        server_url: config.server_url.clone(),
        controller: summary,
    });
    println!("\n{}", report);

    let results = ResultsManager::new(report);
    if let Some(path) = &config.output_file {
        results.write_json(path)?;
    }

    if let Some(url) = &config.report_url {
        let key = config.report_key.as_deref().unwrap_or_default();
        if key.is_empty() {
            warn!("Uploading report without a report key");
        }
        results
            .upload(url, key)
            .await
            .with_context(|| format!("Failed to upload report to {}", url))?;
    }

    info!("API Load Generator completed");
    Ok(())
}
