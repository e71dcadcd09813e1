//! `lnpay decodepay`: decode an invoice without contacting the node.

use clap::Args;
use lnpay_core::Invoice;

#[derive(Args, Debug)]
pub struct DecodepayArgs {
    /// Invoice to decode.
    pub bolt11: String,
}

pub fn run(args: &DecodepayArgs) -> anyhow::Result<()> {
    let invoice = Invoice::decode(&args.bolt11)?;

    println!("Invoice:");
    println!("  Payment hash: {}", invoice.payment_hash);
    println!("  Payee:        {}", invoice.payee);
    match invoice.amount_msat {
        Some(amount) => println!("  Amount:       {}msat", amount),
        None => println!("  Amount:       any"),
    }
    println!("  Description:  {}", invoice.description);
    println!("  Created:      {}", invoice.timestamp);
    println!("  Expires:      {}", invoice.expires_at());
    println!("  Final CLTV:   {}", invoice.min_final_cltv_expiry);
    for (i, hint) in invoice.route_hints.iter().enumerate() {
        println!("  Route hint {}:", i + 1);
        for hop in &hint.hops {
            println!(
                "    {} via {} (base {}msat, {}ppm, cltv {})",
                hop.node_id,
                hop.short_channel_id,
                hop.fee_base_msat,
                hop.fee_proportional_millionths,
                hop.cltv_expiry_delta
            );
        }
    }
    Ok(())
}
