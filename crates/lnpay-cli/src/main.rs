//! lnpay CLI: operator commands against a running lnpay node.
//!
//! Subcommands: getinfo, pay, sendpay, waitsendpay, listsendpays, paystatus,
//! listforwards, setchannelfee, decodepay.

mod client;
mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// lnpay: pay invoices and inspect payments on an lnpay node.
#[derive(Parser, Debug)]
#[command(name = "lnpay", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the node's id, channels and forwarding totals.
    Getinfo(commands::getinfo::GetinfoArgs),
    /// Pay an invoice, retrying over alternative routes.
    Pay(commands::pay::PayArgs),
    /// Send an HTLC along an explicit route.
    Sendpay(commands::sendpay::SendpayArgs),
    /// Wait for the result of a sendpay.
    Waitsendpay(commands::waitsendpay::WaitsendpayArgs),
    /// List sent payments.
    Listsendpays(commands::listsendpays::ListsendpaysArgs),
    /// Show the attempts of pay calls.
    Paystatus(commands::paystatus::PaystatusArgs),
    /// List forwarded HTLCs.
    Listforwards(commands::listforwards::ListforwardsArgs),
    /// Set forwarding fees on a channel, a peer's channels, or all channels.
    Setchannelfee(commands::setchannelfee::SetchannelfeeArgs),
    /// Decode an invoice locally.
    Decodepay(commands::decodepay::DecodepayArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Getinfo(args) => commands::getinfo::run(args).await,
        Commands::Pay(args) => commands::pay::run(args).await,
        Commands::Sendpay(args) => commands::sendpay::run(args).await,
        Commands::Waitsendpay(args) => commands::waitsendpay::run(args).await,
        Commands::Listsendpays(args) => commands::listsendpays::run(args).await,
        Commands::Paystatus(args) => commands::paystatus::run(args).await,
        Commands::Listforwards(args) => commands::listforwards::run(args).await,
        Commands::Setchannelfee(args) => commands::setchannelfee::run(args).await,
        Commands::Decodepay(args) => commands::decodepay::run(args),
    }
}
