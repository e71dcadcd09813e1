//! `lnpay paystatus`: attempts of past and running pay calls.

use clap::Args;
use serde::Deserialize;

use crate::client::{print_json, ApiClient, Endpoint};

#[derive(Args, Debug)]
pub struct PaystatusArgs {
    /// Only pay calls for this invoice.
    pub bolt11: Option<String>,

    /// Print the raw JSON instead of a summary.
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub endpoint: Endpoint,
}

#[derive(Deserialize)]
struct PayStatus {
    pay: Vec<PayEntry>,
}

#[derive(Deserialize)]
struct PayEntry {
    payment_hash: String,
    amount_msat: u64,
    state: String,
    attempts: Vec<AttemptEntry>,
}

#[derive(Deserialize)]
struct AttemptEntry {
    strategy: String,
    duration_ms: Option<u64>,
    outcome: serde_json::Value,
}

fn describe(outcome: &serde_json::Value) -> String {
    if let Some(failure) = outcome.get("failure") {
        let code = failure.get("code").and_then(|c| c.as_i64()).unwrap_or_default();
        let message = failure
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or_default();
        return format!("failed ({code}): {message}");
    }
    if outcome.get("success").is_some() {
        return "succeeded".to_string();
    }
    "pending".to_string()
}

pub async fn run(args: &PaystatusArgs) -> anyhow::Result<()> {
    let client = ApiClient::new(&args.endpoint);
    let mut query = Vec::new();
    if let Some(bolt11) = &args.bolt11 {
        query.push(("bolt11", bolt11.clone()));
    }
    let raw: serde_json::Value = client.get("paystatus", &query).await?;
    if args.json {
        return print_json(&raw);
    }

    let status: PayStatus = serde_json::from_value(raw)?;
    for entry in status.pay {
        println!(
            "{} {}msat [{}]",
            entry.payment_hash, entry.amount_msat, entry.state
        );
        for (i, attempt) in entry.attempts.iter().enumerate() {
            let took = attempt
                .duration_ms
                .map_or_else(|| "-".to_string(), |ms| format!("{ms}ms"));
            println!(
                "  {:>2}. {:<40} {:>8}  {}",
                i + 1,
                attempt.strategy,
                took,
                describe(&attempt.outcome)
            );
        }
    }
    Ok(())
}
