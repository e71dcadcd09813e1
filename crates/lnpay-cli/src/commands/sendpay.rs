//! `lnpay sendpay`: dispatch an explicit route.

use clap::Args;
use serde::Serialize;

use crate::client::{print_json, ApiClient, Endpoint};

#[derive(Args, Debug)]
pub struct SendpayArgs {
    /// Route as JSON (`{"hops": [...]}`), or `@path` to read it from a file.
    pub route: String,

    /// Payment hash in hex.
    pub payment_hash: String,

    #[arg(long)]
    pub label: Option<String>,

    /// Invoice the route pays, recorded with the payment.
    #[arg(long)]
    pub bolt11: Option<String>,

    #[command(flatten)]
    pub endpoint: Endpoint,
}

#[derive(Serialize)]
struct SendPayRequest<'a> {
    route: serde_json::Value,
    payment_hash: &'a str,
    label: Option<&'a str>,
    bolt11: Option<&'a str>,
}

pub async fn run(args: &SendpayArgs) -> anyhow::Result<()> {
    let raw = match args.route.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)?,
        None => args.route.clone(),
    };
    let route: serde_json::Value = serde_json::from_str(&raw)?;

    let client = ApiClient::new(&args.endpoint);
    let body = SendPayRequest {
        route,
        payment_hash: &args.payment_hash,
        label: args.label.as_deref(),
        bolt11: args.bolt11.as_deref(),
    };
    let record: serde_json::Value = client.post("sendpay", &body).await?;
    print_json(&record)
}
