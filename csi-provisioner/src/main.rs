use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use csi_provisioner::bridge::{JsonLinesStore, forward_events};
use csi_provisioner::config::{Args, ClusterSource, LogFormat, ProvisionerConfig};
use csi_provisioner::discovery::discover;
use csi_provisioner::{CsiProvisioner, Identity, ProvisionController};
use libcsi::CsiClient;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// stdout carries the bridge protocol, logs go to stderr.
fn init_tracing(format: LogFormat) {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);
    let mut config = ProvisionerConfig::try_from(args).context("invalid configuration")?;
    info!(provisioner = %config.provisioner.provisioner_name, "CSI provisioner specified");

    match &config.cluster {
        ClusterSource::InCluster => info!("building cluster config for running in cluster"),
        ClusterSource::External { master, kubeconfig } => info!(
            master = master.as_deref().unwrap_or_default(),
            kubeconfig = %kubeconfig.as_deref().map(|p| p.display().to_string()).unwrap_or_default(),
            "using external cluster config"
        ),
    }

    let endpoint = config.csi_endpoint.display().to_string();
    let client = Arc::new(CsiClient::new(&config.csi_endpoint));
    let driver = discover(client.as_ref(), &endpoint, &config.connect_retry)
        .await
        .context("CSI plugin discovery failed")?;
    config.provisioner.supports_topology = driver.supports_topology;

    let identity = Identity::generate(&config.provisioner.provisioner_name);
    info!(%identity, plugin = %driver.name, "provisioner identity generated");

    let shutdown = CancellationToken::new();
    let provisioner = Arc::new(CsiProvisioner::new(
        config.provisioner,
        identity,
        client,
        shutdown.clone(),
    ));
    let store = Arc::new(JsonLinesStore::new(tokio::io::stdout()));
    let controller = Arc::new(ProvisionController::new(
        provisioner,
        store,
        config.controller,
    ));

    let (tx, rx) = mpsc::channel(128);
    tokio::spawn(async move {
        match forward_events(tokio::io::stdin(), tx).await {
            Ok(count) => info!(count, "event input closed"),
            Err(e) => warn!(error = %e, "reading events failed"),
        }
    });

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        info!("shutdown requested");
        signal.cancel();
    });

    controller.run(rx, shutdown).await;
    Ok(())
}
