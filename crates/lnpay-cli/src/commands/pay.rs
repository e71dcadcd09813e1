//! `lnpay pay`: pay an invoice.

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::client::{ApiClient, Endpoint};

#[derive(Args, Debug)]
pub struct PayArgs {
    /// Invoice to pay.
    pub bolt11: String,

    /// Amount in msat, only for invoices without one.
    #[arg(long)]
    pub msatoshi: Option<u64>,

    #[arg(long)]
    pub label: Option<String>,

    /// Fee cap as a percentage of the amount.
    #[arg(long)]
    pub maxfeepercent: Option<f64>,

    /// Fees up to this many msat are always accepted.
    #[arg(long)]
    pub exemptfee: Option<u64>,

    /// Largest additional delay in blocks.
    #[arg(long)]
    pub maxdelay: Option<u32>,

    #[arg(long)]
    pub riskfactor: Option<f64>,

    /// Give up after this many attempts.
    #[arg(long)]
    pub max_attempts: Option<usize>,

    #[command(flatten)]
    pub endpoint: Endpoint,
}

#[derive(Serialize)]
struct PayRequest<'a> {
    bolt11: &'a str,
    amount_msat: Option<u64>,
    label: Option<&'a str>,
    maxfeepercent: Option<f64>,
    exemptfee_msat: Option<u64>,
    maxdelay: Option<u32>,
    riskfactor: Option<f64>,
    max_attempts: Option<usize>,
}

#[derive(Deserialize)]
struct PayResponse {
    payment_hash: String,
    destination: String,
    status: String,
    payment_preimage: Option<String>,
    msatoshi: u64,
    amount_sent_msat: u64,
}

pub async fn run(args: &PayArgs) -> anyhow::Result<()> {
    let client = ApiClient::new(&args.endpoint);
    let body = PayRequest {
        bolt11: &args.bolt11,
        amount_msat: args.msatoshi,
        label: args.label.as_deref(),
        maxfeepercent: args.maxfeepercent,
        exemptfee_msat: args.exemptfee,
        maxdelay: args.maxdelay,
        riskfactor: args.riskfactor,
        max_attempts: args.max_attempts,
    };
    let resp: PayResponse = client.post("pay", &body).await?;

    println!("Payment {}", resp.status);
    println!("  Hash:        {}", resp.payment_hash);
    println!("  Destination: {}", resp.destination);
    println!("  Amount:      {}msat", resp.msatoshi);
    println!("  Sent:        {}msat", resp.amount_sent_msat);
    if let Some(preimage) = resp.payment_preimage {
        println!("  Preimage:    {}", preimage);
    }
    Ok(())
}
