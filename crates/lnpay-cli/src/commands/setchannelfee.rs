//! `lnpay setchannelfee`: per-channel forwarding fees.

use clap::Args;
use serde::Serialize;

use crate::client::{print_json, ApiClient, Endpoint};

#[derive(Args, Debug)]
pub struct SetchannelfeeArgs {
    /// Short channel id, peer node id, or `all`.
    pub id: String,

    /// Base fee in msat; the node default when omitted.
    #[arg(allow_negative_numbers = true)]
    pub base: Option<i64>,

    /// Proportional fee in millionths; the node default when omitted.
    #[arg(allow_negative_numbers = true)]
    pub ppm: Option<i64>,

    #[command(flatten)]
    pub endpoint: Endpoint,
}

#[derive(Serialize)]
struct SetChannelFeeRequest<'a> {
    id: &'a str,
    base: Option<i64>,
    ppm: Option<i64>,
}

pub async fn run(args: &SetchannelfeeArgs) -> anyhow::Result<()> {
    let client = ApiClient::new(&args.endpoint);
    let body = SetChannelFeeRequest {
        id: &args.id,
        base: args.base,
        ppm: args.ppm,
    };
    let change: serde_json::Value = client.post("setchannelfee", &body).await?;
    print_json(&change)
}
