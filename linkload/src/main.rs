/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use secrecy::SecretString;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use linkload::config::Config;
use linkload::estimator::EnergyEstimator;
use linkload::orchestrator::Orchestrator;
use linkload::remote::SshController;
use linkload::scheduler::{LinkScheduler, Pipeline};
use linkload::server;
use linkload::submission::{CimGateway, InfluxPredictionStore, SubmissionGateway};
use linkload::telemetry::InfluxTelemetry;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Per-link wireless workload scheduler.
///
/// Example:
///   LINKLOAD_TELEMETRY_PASSWORD=… linkload --config demos/linkload.yaml
#[derive(Debug, Parser)]
#[command(
    name = "linkload",
    about = "Per-link iperf workload scheduler with energy estimation",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short = 'c', long = "config", env = "LINKLOAD_CONFIG")]
    config: PathBuf,

    /// Listen address; overrides `server.bind` from the configuration file.
    #[arg(short = 'b', long = "bind", env = "LINKLOAD_BIND")]
    bind: Option<String>,

    /// Password for the telemetry InfluxDB.
    #[arg(long, env = "LINKLOAD_TELEMETRY_PASSWORD", hide_env_values = true)]
    telemetry_password: Option<String>,

    /// Password for the prediction store.  Falls back to the telemetry password.
    #[arg(long, env = "LINKLOAD_STORE_PASSWORD", hide_env_values = true)]
    store_password: Option<String>,

    /// Password for the CIM token exchange.
    #[arg(long, env = "LINKLOAD_CIM_PASSWORD", hide_env_values = true)]
    cim_password: Option<String>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("linkload starting up...");

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // ── Load configuration ────────────────────────────────────────────────────
    let mut config = Config::load_from_file(&cli.config)?;
    inject_secrets(&mut config, &cli);

    let bind = cli.bind.clone().unwrap_or_else(|| config.server.bind.clone());
    info!(
        config = %cli.config.display(),
        bind = %bind,
        tail_wait_s = config.scheduler.tail_wait_secs,
        "Configuration"
    );

    // ── Wire the pipeline ─────────────────────────────────────────────────────
    let topology = Arc::new(config.topology.clone());
    let controller = Arc::new(SshController::new(&config.ssh));
    let orchestrator = Orchestrator::new(
        controller,
        topology.clone(),
        config.ssh.command_timeout(),
    );

    let telemetry =
        InfluxTelemetry::new(&config.telemetry).context("Failed to set up telemetry client")?;
    let estimator = EnergyEstimator::new(Arc::new(telemetry), config.estimator.clone());

    let gateways = build_gateways(&config)?;
    if gateways.is_empty() {
        warn!("No submission gateway configured; predictions will only be logged");
    }

    let pipeline = Pipeline::new(
        orchestrator,
        estimator,
        gateways,
        Duration::from_secs(config.scheduler.tail_wait_secs),
    );
    let scheduler = Arc::new(LinkScheduler::new(topology, Arc::new(pipeline)));

    // ── Serve until Ctrl-C ────────────────────────────────────────────────────
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Cannot bind HTTP listener on {bind}"))?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    server::serve(listener, server::router(scheduler.clone()), shutdown)
        .await
        .context("HTTP server failed")?;

    info!("Waiting for in-flight executions to finish");
    scheduler.shutdown().await;
    info!("linkload stopped");
    Ok(())
}

fn inject_secrets(config: &mut Config, cli: &Cli) {
    let secret = |s: &Option<String>| s.clone().map(SecretString::from);

    config.telemetry.password = secret(&cli.telemetry_password);
    if let Some(store) = config.prediction_store.as_mut() {
        store.password = secret(&cli.store_password).or_else(|| secret(&cli.telemetry_password));
    }
    if let Some(cim) = config.submission.as_mut() {
        cim.password = secret(&cli.cim_password);
    }
}

fn build_gateways(config: &Config) -> Result<Vec<Arc<dyn SubmissionGateway>>> {
    let mut gateways: Vec<Arc<dyn SubmissionGateway>> = Vec::new();

    if let Some(store) = &config.prediction_store {
        let gw = InfluxPredictionStore::new(store)
            .context("Failed to set up InfluxDB prediction store")?;
        info!(url = %store.url, database = %store.database, "Prediction store enabled");
        gateways.push(Arc::new(gw));
    }
    if let Some(cim) = &config.submission {
        let gw = CimGateway::new(cim)
            .context("Failed to set up CIM gateway (is LINKLOAD_CIM_PASSWORD set?)")?;
        info!(url = %cim.base_url, site = %cim.site, "CIM submission enabled");
        gateways.push(Arc::new(gw));
    }
    Ok(gateways)
}
