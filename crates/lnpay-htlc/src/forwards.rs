//! Ledger of HTLCs this node relayed on behalf of others.
//!
//! Each incoming HTLC is recorded as `offered` when it arrives and moves exactly
//! once to a terminal state. Fee totals are derived from settled records only.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lnpay_core::{PaymentHash, ShortChannelId};
use serde::{Deserialize, Serialize};

use crate::error::HtlcError;
use crate::types::FailureCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardState {
    /// Accepted on the incoming channel, not yet resolved.
    Offered,
    /// The payee revealed the preimage and the fee was earned.
    Settled,
    /// Rejected before being committed onward, or failed downstream.
    Failed,
    /// Failed by this node after commitment: the outgoing channel closed or the
    /// HTLC timed out on chain.
    LocalFailed,
}

impl ForwardState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Offered)
    }
}

impl fmt::Display for ForwardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offered => write!(f, "offered"),
            Self::Settled => write!(f, "settled"),
            Self::Failed => write!(f, "failed"),
            Self::LocalFailed => write!(f, "local_failed"),
        }
    }
}

/// One relayed HTLC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardedPayment {
    pub id: u64,
    pub in_channel: ShortChannelId,
    /// Unset when the next hop could not be resolved at all.
    pub out_channel: Option<ShortChannelId>,
    pub in_htlc_id: u64,
    pub payment_hash: PaymentHash,
    pub in_msat: u64,
    pub out_msat: u64,
    pub state: ForwardState,
    pub failcode: Option<FailureCode>,
    pub received_time: DateTime<Utc>,
    pub resolved_time: Option<DateTime<Utc>>,
}

impl ForwardedPayment {
    pub fn fee_msat(&self) -> u64 {
        self.in_msat.saturating_sub(self.out_msat)
    }

    pub fn key(&self) -> (ShortChannelId, u64) {
        (self.in_channel, self.in_htlc_id)
    }
}

/// Optional filters for [`ForwardingLedger::list`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardFilter {
    pub in_channel: Option<ShortChannelId>,
    pub out_channel: Option<ShortChannelId>,
    pub state: Option<ForwardState>,
}

impl ForwardFilter {
    fn matches(&self, fwd: &ForwardedPayment) -> bool {
        self.in_channel.map_or(true, |c| c == fwd.in_channel)
            && self.out_channel.map_or(true, |c| Some(c) == fwd.out_channel)
            && self.state.map_or(true, |s| s == fwd.state)
    }
}

/// Per-channel forwarding counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub in_payments_offered: u64,
    pub in_payments_fulfilled: u64,
    pub in_msatoshi_offered: u64,
    pub in_msatoshi_fulfilled: u64,
    pub out_payments_offered: u64,
    pub out_payments_fulfilled: u64,
    pub out_msatoshi_offered: u64,
    pub out_msatoshi_fulfilled: u64,
}

pub struct ForwardingLedger {
    forwards: DashMap<(ShortChannelId, u64), ForwardedPayment>,
    next_id: AtomicU64,
}

impl ForwardingLedger {
    pub fn new() -> Self {
        Self {
            forwards: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Rebuild from persisted records, continuing the id sequence after them.
    pub fn from_records(records: impl IntoIterator<Item = ForwardedPayment>) -> Self {
        let ledger = Self::new();
        let mut max_id = 0;
        for record in records {
            max_id = max_id.max(record.id);
            ledger.forwards.insert(record.key(), record);
        }
        ledger.next_id.store(max_id + 1, Ordering::SeqCst);
        ledger
    }

    /// Record an incoming HTLC as `offered`.
    pub fn offer(
        &self,
        in_channel: ShortChannelId,
        in_htlc_id: u64,
        out_channel: Option<ShortChannelId>,
        payment_hash: PaymentHash,
        in_msat: u64,
        out_msat: u64,
    ) -> Result<ForwardedPayment, HtlcError> {
        match self.forwards.entry((in_channel, in_htlc_id)) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(HtlcError::DuplicateForward {
                in_channel,
                in_htlc_id,
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let record = ForwardedPayment {
                    id: self.next_id.fetch_add(1, Ordering::SeqCst),
                    in_channel,
                    out_channel,
                    in_htlc_id,
                    payment_hash,
                    in_msat,
                    out_msat,
                    state: ForwardState::Offered,
                    failcode: None,
                    received_time: Utc::now(),
                    resolved_time: None,
                };
                slot.insert(record.clone());
                tracing::debug!(
                    in_channel = %in_channel,
                    in_htlc_id,
                    out_channel = ?out_channel.map(|c| c.to_string()),
                    in_msat,
                    out_msat,
                    "forward offered"
                );
                Ok(record)
            }
        }
    }

    /// Move an offered forward to a terminal state.
    pub fn resolve(
        &self,
        in_channel: ShortChannelId,
        in_htlc_id: u64,
        state: ForwardState,
        failcode: Option<FailureCode>,
    ) -> Result<ForwardedPayment, HtlcError> {
        let mut entry = self
            .forwards
            .get_mut(&(in_channel, in_htlc_id))
            .ok_or(HtlcError::ForwardNotFound {
                in_channel,
                in_htlc_id,
            })?;
        let record = entry.value_mut();
        if record.state.is_terminal() || !state.is_terminal() {
            return Err(HtlcError::ForwardResolved {
                in_channel,
                in_htlc_id,
                state: record.state,
            });
        }
        record.state = state;
        record.failcode = failcode;
        record.resolved_time = Some(Utc::now());
        tracing::info!(
            in_channel = %in_channel,
            in_htlc_id,
            state = %state,
            fee_msat = record.fee_msat(),
            "forward resolved"
        );
        Ok(record.clone())
    }

    pub fn get(&self, in_channel: ShortChannelId, in_htlc_id: u64) -> Option<ForwardedPayment> {
        self.forwards
            .get(&(in_channel, in_htlc_id))
            .map(|r| r.value().clone())
    }

    /// Forwards matching `filter`, oldest first.
    pub fn list(&self, filter: &ForwardFilter) -> Vec<ForwardedPayment> {
        let mut records: Vec<ForwardedPayment> = self
            .forwards
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn channel_stats(&self, scid: &ShortChannelId) -> ChannelStats {
        let mut stats = ChannelStats::default();
        for entry in self.forwards.iter() {
            let fwd = entry.value();
            let settled = fwd.state == ForwardState::Settled;
            if fwd.in_channel == *scid {
                stats.in_payments_offered += 1;
                stats.in_msatoshi_offered += fwd.in_msat;
                if settled {
                    stats.in_payments_fulfilled += 1;
                    stats.in_msatoshi_fulfilled += fwd.in_msat;
                }
            }
            if fwd.out_channel == Some(*scid) {
                stats.out_payments_offered += 1;
                stats.out_msatoshi_offered += fwd.out_msat;
                if settled {
                    stats.out_payments_fulfilled += 1;
                    stats.out_msatoshi_fulfilled += fwd.out_msat;
                }
            }
        }
        stats
    }

    /// Sum of fees over settled forwards.
    pub fn fees_collected_msat(&self) -> u64 {
        self.forwards
            .iter()
            .filter(|r| r.state == ForwardState::Settled)
            .map(|r| r.fee_msat())
            .sum()
    }

    pub fn len(&self) -> usize {
        self.forwards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forwards.is_empty()
    }
}

impl Default for ForwardingLedger {
    fn default() -> Self {
        Self::new()
    }
}
