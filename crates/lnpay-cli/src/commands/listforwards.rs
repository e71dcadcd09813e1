//! `lnpay listforwards`: HTLCs relayed by the node.

use clap::Args;

use crate::client::{print_json, ApiClient, Endpoint};

#[derive(Args, Debug)]
pub struct ListforwardsArgs {
    /// Only forwards arriving on this channel.
    #[arg(long)]
    pub in_channel: Option<String>,

    /// Only forwards leaving on this channel.
    #[arg(long)]
    pub out_channel: Option<String>,

    /// offered, settled, failed or local_failed.
    #[arg(long)]
    pub status: Option<String>,

    #[command(flatten)]
    pub endpoint: Endpoint,
}

pub async fn run(args: &ListforwardsArgs) -> anyhow::Result<()> {
    let client = ApiClient::new(&args.endpoint);
    let query: Vec<(&str, String)> = [
        ("in_channel", &args.in_channel),
        ("out_channel", &args.out_channel),
        ("status", &args.status),
    ]
    .into_iter()
    .filter_map(|(key, value)| value.clone().map(|v| (key, v)))
    .collect();
    let forwards: serde_json::Value = client.get("listforwards", &query).await?;
    print_json(&forwards)
}
