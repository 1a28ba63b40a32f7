//! Group Snapshot Operator Entry Point
//!
//! Starts the volume group snapshot controller.

use clap::Parser;
use group_snapshot_operator::config::Settings;
use group_snapshot_operator::controller;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    let settings = Settings::parse();

    info!(
        "Starting group-snapshot-operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    controller::run_controller(client, settings).await?;

    info!("Controller stopped, exiting");
    Ok(())
}
