//! lnpay node: entry point.
//!
//! Loads the node configuration, builds the simulated network the node dispatches
//! over, reconciles payments left pending by a previous run and serves the HTTP API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use lnpay_core::NodeId;
use lnpay_htlc::{FeeSchedule, HtlcDispatcher, NetworkDescription, SimulatedNetwork};
use lnpay_routing::ChannelGraph;
use tracing_subscriber::EnvFilter;

use lnpay_node::api::{start_api_server, ApiState};
use lnpay_node::{NodeConfig, PaymentService, PaymentStore};

/// lnpay payment node
#[derive(Parser, Debug)]
#[command(name = "lnpay-node", version, about = "lnpay payment node")]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, default_value = "lnpay.toml")]
    config: PathBuf,

    /// Override the API port.
    #[arg(long)]
    api_port: Option<u16>,

    /// Override the data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the network description file.
    #[arg(long)]
    network: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Generate a default config file and exit.
    #[arg(long)]
    init: bool,
}

fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

fn load_network(config: &NodeConfig) -> anyhow::Result<SimulatedNetwork> {
    let defaults = FeeSchedule::from(config.fees);
    let description = match &config.network.description {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading network description {}", path.display()))?;
            Some(serde_json::from_str::<NetworkDescription>(&contents)?)
        }
        None => None,
    };

    let local = match (&config.node.id, &description) {
        (Some(id), _) => NodeId::new(id)?,
        (None, Some(desc)) => desc
            .nodes
            .first()
            .cloned()
            .context("network description has no nodes")?,
        (None, None) => anyhow::bail!("set node.id or network.description in the config"),
    };

    match description {
        Some(desc) => Ok(SimulatedNetwork::from_description(local, defaults, &desc)?),
        None => Ok(SimulatedNetwork::new(local, defaults)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.init {
        init_tracing(&args.log_level, "text");
        let config = NodeConfig::default();
        config.save(&args.config)?;
        tracing::info!(path = %args.config.display(), "wrote default config");
        return Ok(());
    }

    let mut config = NodeConfig::load(&args.config)?;
    if let Some(api_port) = args.api_port {
        config.api.port = api_port;
    }
    if let Some(ref data_dir) = args.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if let Some(ref network) = args.network {
        config.network.description = Some(network.clone());
    }
    config.logging.level = args.log_level;
    init_tracing(&config.logging.level, &config.logging.format);

    tracing::info!("lnpay node v{}", env!("CARGO_PKG_VERSION"));

    let network = Arc::new(load_network(&config)?);
    let local = network.node_id().clone();
    let graph = match &config.network.graph {
        Some(path) => ChannelGraph::load(path)?,
        None => ChannelGraph::from_edges(network.gossip()),
    };
    let store = Arc::new(PaymentStore::open(&config.payments_dir())?);
    let fees = network.fee_policy(&local)?;
    let service = PaymentService::new(
        config.pay.clone(),
        store,
        Arc::new(graph),
        network.clone(),
        fees,
    )?;

    let reconciled = service.reconcile_pending().await?;
    if reconciled > 0 {
        tracing::info!(reconciled, "pending payments from previous run reconciled");
    }

    let listen_addr = config.api_socket_addr()?;
    let state = Arc::new(ApiState { service });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        tracing::info!("received shutdown signal");
    };

    tokio::select! {
        result = start_api_server(listen_addr, state) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "API server error");
            }
        }
        _ = shutdown => {
            tracing::info!("initiating graceful shutdown");
        }
    }

    tracing::info!("lnpay node exited cleanly");
    Ok(())
}
