//! `lnpay getinfo`: summary of the node.

use clap::Args;
use serde::Deserialize;

use crate::client::{ApiClient, Endpoint};

#[derive(Args, Debug)]
pub struct GetinfoArgs {
    #[command(flatten)]
    pub endpoint: Endpoint,
}

#[derive(Deserialize)]
struct NodeInfo {
    id: String,
    version: String,
    adapter: String,
    num_channels: usize,
    num_active_channels: usize,
    num_pending_payments: usize,
    num_forwards: usize,
    fees_collected_msat: u64,
}

pub async fn run(args: &GetinfoArgs) -> anyhow::Result<()> {
    let client = ApiClient::new(&args.endpoint);
    let info: NodeInfo = client.get("getinfo", &[]).await?;

    println!("Node:");
    println!("  Id:               {}", info.id);
    println!("  Version:          {}", info.version);
    println!("  Adapter:          {}", info.adapter);
    println!(
        "  Channels:         {} ({} active)",
        info.num_channels, info.num_active_channels
    );
    println!("  Pending payments: {}", info.num_pending_payments);
    println!("  Forwards:         {}", info.num_forwards);
    println!("  Fees collected:   {}msat", info.fees_collected_msat);
    Ok(())
}
