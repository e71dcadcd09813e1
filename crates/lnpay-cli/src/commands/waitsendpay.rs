//! `lnpay waitsendpay`: wait for a sendpay to resolve.

use clap::Args;

use crate::client::{print_json, ApiClient, Endpoint};

#[derive(Args, Debug)]
pub struct WaitsendpayArgs {
    /// Payment hash in hex.
    pub payment_hash: String,

    /// Seconds to wait before giving up.
    #[arg(long)]
    pub timeout: Option<u64>,

    #[command(flatten)]
    pub endpoint: Endpoint,
}

pub async fn run(args: &WaitsendpayArgs) -> anyhow::Result<()> {
    let client = ApiClient::new(&args.endpoint);
    let mut query = Vec::new();
    if let Some(timeout) = args.timeout {
        query.push(("timeout", timeout.to_string()));
    }
    let path = format!("waitsendpay/{}", args.payment_hash);
    let record: serde_json::Value = client.get(&path, &query).await?;
    print_json(&record)
}
