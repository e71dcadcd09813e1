//! Decoded invoice records and the invoice string codec.
//!
//! An encoded invoice is `lnpay1` followed by the hex form of the JSON invoice body and
//! an 8-byte BLAKE3 checksum over that body. Hex keeps the whole string case-insensitive,
//! so `decode` accepts upper, lower or mixed case as well as a `lightning:` URI prefix.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{NodeId, PaymentHash, ShortChannelId};

/// Human-readable part every encoded invoice starts with.
pub const INVOICE_PREFIX: &str = "lnpay1";

const URI_PREFIX: &str = "lightning:";
const CHECKSUM_LEN: usize = 8;

/// Expiry applied when the issuer did not set one (one hour).
pub const DEFAULT_EXPIRY_SECS: u64 = 3600;

/// One hop of a private path segment. `node_id` is the forwarding node; the channel
/// leads to the next hint hop, or to the payee for the last hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHintHop {
    pub node_id: NodeId,
    pub short_channel_id: ShortChannelId,
    pub fee_base_msat: u64,
    pub fee_proportional_millionths: u64,
    pub cltv_expiry_delta: u32,
}

impl RouteHintHop {
    /// Fee this hop charges to forward `amount_msat`.
    pub fn fee_msat(&self, amount_msat: u64) -> Option<u64> {
        let proportional = amount_msat
            .checked_mul(self.fee_proportional_millionths)?
            / 1_000_000;
        self.fee_base_msat.checked_add(proportional)
    }
}

/// Private last-mile path embedded in an invoice by its issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHint {
    pub hops: Vec<RouteHintHop>,
}

impl RouteHint {
    pub fn new(hops: Vec<RouteHintHop>) -> Self {
        Self { hops }
    }

    /// Node the public route must reach before the hint takes over.
    pub fn entry_node(&self) -> Option<&NodeId> {
        self.hops.first().map(|h| &h.node_id)
    }

    pub fn contains_channel(&self, scid: &ShortChannelId) -> bool {
        self.hops.iter().any(|h| h.short_channel_id == *scid)
    }

    pub fn channels(&self) -> Vec<ShortChannelId> {
        self.hops.iter().map(|h| h.short_channel_id).collect()
    }
}

/// A decoded invoice: everything the payer needs to route and pay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub payment_hash: PaymentHash,
    /// `None` for "any amount" invoices.
    pub amount_msat: Option<u64>,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub expiry_secs: u64,
    pub min_final_cltv_expiry: u32,
    pub payee: NodeId,
    #[serde(default)]
    pub route_hints: Vec<RouteHint>,
}

impl Invoice {
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.expiry_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|expiry| self.timestamp.checked_add_signed(expiry))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }

    /// Encode into the `lnpay1...` string form.
    pub fn encode(&self) -> Result<String, CoreError> {
        let body =
            serde_json::to_vec(self).map_err(|e| CoreError::InvoiceDecode(e.to_string()))?;
        let checksum = checksum(&body);
        Ok(format!(
            "{INVOICE_PREFIX}{}{}",
            hex::encode(&body),
            hex::encode(checksum)
        ))
    }

    /// Decode an invoice string. Case-insensitive; tolerates a `lightning:` prefix.
    pub fn decode(encoded: &str) -> Result<Self, CoreError> {
        let lowered = encoded.trim().to_ascii_lowercase();
        let payload = lowered.strip_prefix(URI_PREFIX).unwrap_or(&lowered);
        let data = payload.strip_prefix(INVOICE_PREFIX).ok_or_else(|| {
            CoreError::InvoiceDecode(format!("missing {INVOICE_PREFIX} prefix"))
        })?;

        let raw = hex::decode(data).map_err(|e| CoreError::InvoiceDecode(e.to_string()))?;
        if raw.len() <= CHECKSUM_LEN {
            return Err(CoreError::InvoiceDecode("invoice too short".into()));
        }
        let (body, sum) = raw.split_at(raw.len() - CHECKSUM_LEN);
        if checksum(body) != sum {
            return Err(CoreError::ChecksumMismatch);
        }

        let invoice: Invoice =
            serde_json::from_slice(body).map_err(|e| CoreError::InvoiceDecode(e.to_string()))?;
        invoice.validate()?;
        Ok(invoice)
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.amount_msat == Some(0) {
            return Err(CoreError::InvoiceDecode("amount must be positive".into()));
        }
        for hint in &self.route_hints {
            if hint.hops.is_empty() {
                return Err(CoreError::InvoiceDecode("empty route hint".into()));
            }
        }
        Ok(())
    }
}

fn checksum(body: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = blake3::hash(body);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest.as_bytes()[..CHECKSUM_LEN]);
    out
}
