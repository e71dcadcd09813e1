//! `lnpay listsendpays`: sent payments, oldest first.

use clap::Args;

use crate::client::{print_json, ApiClient, Endpoint};

#[derive(Args, Debug)]
pub struct ListsendpaysArgs {
    /// Only payments for this invoice.
    #[arg(long)]
    pub bolt11: Option<String>,

    /// Only payments with this hash.
    #[arg(long)]
    pub payment_hash: Option<String>,

    #[command(flatten)]
    pub endpoint: Endpoint,
}

pub async fn run(args: &ListsendpaysArgs) -> anyhow::Result<()> {
    let client = ApiClient::new(&args.endpoint);
    let mut query = Vec::new();
    if let Some(bolt11) = &args.bolt11 {
        query.push(("bolt11", bolt11.clone()));
    }
    if let Some(hash) = &args.payment_hash {
        query.push(("payment_hash", hash.clone()));
    }
    let payments: serde_json::Value = client.get("listsendpays", &query).await?;
    print_json(&payments)
}
