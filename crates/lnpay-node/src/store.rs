//! Payment store: SendPay records, per-invoice pay status with its attempt
//! ledger, and forwarded HTLCs.
//!
//! Every mutation is written through to RocksDB before the in-memory view is
//! updated for readers, so a restart sees at least what callers observed.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lnpay_core::{NodeId, PayState, PaymentHash, Preimage, RouteHint, ShortChannelId};
use lnpay_htlc::{ForwardedPayment, WireFailure};
use lnpay_routing::Route;
use serde::{Deserialize, Serialize};

use crate::error::PayError;
use crate::storage::{Storage, CF_FORWARDS, CF_META, CF_PAYSTATUS, CF_SENDPAYS};

const SCHEMA_VERSION: &[u8] = b"1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendPayStatus {
    Pending,
    Complete,
    Failed,
}

impl fmt::Display for SendPayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One dispatched HTLC for a payment hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendPayRecord {
    pub id: u64,
    pub payment_hash: PaymentHash,
    pub destination: NodeId,
    /// What the payee was asked to receive.
    pub msatoshi: u64,
    pub amount_sent_msat: u64,
    pub status: SendPayStatus,
    pub payment_preimage: Option<Preimage>,
    pub created_at: DateTime<Utc>,
    pub label: Option<String>,
    pub bolt11: Option<String>,
    pub route: Route,
    pub failure: Option<WireFailure>,
}

/// Fields of a SendPay record the caller provides.
#[derive(Debug, Clone)]
pub struct NewSendPay {
    pub payment_hash: PaymentHash,
    pub route: Route,
    pub label: Option<String>,
    pub bolt11: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendPayFilter {
    pub payment_hash: Option<PaymentHash>,
    pub bolt11: Option<String>,
}

/// Limits a pay() call ran with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PayParams {
    pub maxfeepercent: f64,
    pub exemptfee_msat: u64,
    pub maxdelay: u32,
    pub riskfactor: f64,
    pub max_attempts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub code: i32,
    pub message: String,
    pub erring_node: Option<NodeId>,
    pub erring_channel: Option<ShortChannelId>,
}

impl From<&PayError> for AttemptFailure {
    fn from(err: &PayError) -> Self {
        let (erring_node, erring_channel) = match err {
            PayError::TryOtherRoute(f) | PayError::DestinationPermFail(f) => {
                (Some(f.erring_node.clone()), f.erring_channel)
            }
            _ => (None, None),
        };
        Self {
            code: err.code(),
            message: err.to_string(),
            erring_node,
            erring_channel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Pending,
    Success { payment_preimage: Preimage },
    Failure(AttemptFailure),
}

/// One solve-and-dispatch iteration of a pay() call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// What changed since the previous attempt.
    pub strategy: String,
    pub start_time: DateTime<Utc>,
    pub duration_ms: Option<u64>,
    pub route: Option<Route>,
    pub routehint: Option<RouteHint>,
    pub excluded_channels: Vec<ShortChannelId>,
    pub outcome: AttemptOutcome,
}

impl Attempt {
    pub fn start(
        strategy: impl Into<String>,
        routehint: Option<RouteHint>,
        excluded_channels: Vec<ShortChannelId>,
    ) -> Self {
        Self {
            strategy: strategy.into(),
            start_time: Utc::now(),
            duration_ms: None,
            route: None,
            routehint,
            excluded_channels,
            outcome: AttemptOutcome::Pending,
        }
    }
}

/// Status of one pay() call and its ordered attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayStatusEntry {
    pub id: u64,
    pub bolt11: String,
    pub payment_hash: PaymentHash,
    pub destination: NodeId,
    pub amount_msat: u64,
    pub label: Option<String>,
    pub params: PayParams,
    pub state: PayState,
    pub started_at: DateTime<Utc>,
    pub attempts: Vec<Attempt>,
    pub failure: Option<PayError>,
}

impl PayStatusEntry {
    pub fn new(
        bolt11: String,
        payment_hash: PaymentHash,
        destination: NodeId,
        amount_msat: u64,
        label: Option<String>,
        params: PayParams,
    ) -> Self {
        Self {
            id: 0,
            bolt11,
            payment_hash,
            destination,
            amount_msat,
            label,
            params,
            state: PayState::Initial,
            started_at: Utc::now(),
            attempts: Vec::new(),
            failure: None,
        }
    }
}

pub struct PaymentStore {
    storage: Storage,
    sendpays: DashMap<u64, SendPayRecord>,
    pays: DashMap<u64, PayStatusEntry>,
    next_sendpay_id: AtomicU64,
    next_pay_id: AtomicU64,
}

impl PaymentStore {
    /// Open the database at `path` and load every record into memory.
    pub fn open(path: &Path) -> Result<Self> {
        let storage = Storage::open(path)?;
        storage.put(CF_META, b"schema_version", SCHEMA_VERSION)?;

        let sendpays: Vec<SendPayRecord> = storage.load_json(CF_SENDPAYS)?;
        let pays: Vec<PayStatusEntry> = storage.load_json(CF_PAYSTATUS)?;
        let next_sendpay_id = sendpays.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let next_pay_id = pays.iter().map(|p| p.id).max().unwrap_or(0) + 1;

        tracing::info!(
            path = %path.display(),
            sendpays = sendpays.len(),
            pays = pays.len(),
            "payment store opened"
        );

        Ok(Self {
            storage,
            sendpays: sendpays.into_iter().map(|r| (r.id, r)).collect(),
            pays: pays.into_iter().map(|p| (p.id, p)).collect(),
            next_sendpay_id: AtomicU64::new(next_sendpay_id),
            next_pay_id: AtomicU64::new(next_pay_id),
        })
    }

    // --- SendPay records ---

    /// Durably record a new `pending` SendPay. Must happen before dispatch.
    pub fn insert_sendpay(&self, new: NewSendPay) -> Result<SendPayRecord> {
        let destination = new
            .route
            .destination()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("route has no hops"))?;
        let record = SendPayRecord {
            id: self.next_sendpay_id.fetch_add(1, Ordering::SeqCst),
            payment_hash: new.payment_hash,
            destination,
            msatoshi: new.route.amount_delivered_msat(),
            amount_sent_msat: new.route.amount_sent_msat(),
            status: SendPayStatus::Pending,
            payment_preimage: None,
            created_at: Utc::now(),
            label: new.label,
            bolt11: new.bolt11,
            route: new.route,
            failure: None,
        };
        self.storage
            .put_json(CF_SENDPAYS, &record.id.to_be_bytes(), &record)?;
        self.sendpays.insert(record.id, record.clone());
        tracing::debug!(id = record.id, payment_hash = %record.payment_hash, "sendpay recorded");
        Ok(record)
    }

    pub fn complete_sendpay(&self, id: u64, preimage: Preimage) -> Result<SendPayRecord> {
        self.resolve_sendpay(id, |record| {
            record.status = SendPayStatus::Complete;
            record.payment_preimage = Some(preimage);
        })
    }

    pub fn fail_sendpay(&self, id: u64, failure: WireFailure) -> Result<SendPayRecord> {
        self.resolve_sendpay(id, |record| {
            record.status = SendPayStatus::Failed;
            record.failure = Some(failure);
        })
    }

    fn resolve_sendpay<F>(&self, id: u64, apply: F) -> Result<SendPayRecord>
    where
        F: FnOnce(&mut SendPayRecord),
    {
        let mut entry = self
            .sendpays
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("sendpay {id} not found"))?;
        if entry.status != SendPayStatus::Pending {
            anyhow::bail!("sendpay {id} is already {}", entry.status);
        }
        let mut updated = entry.clone();
        apply(&mut updated);
        self.storage
            .put_json(CF_SENDPAYS, &id.to_be_bytes(), &updated)?;
        *entry = updated.clone();
        tracing::info!(
            id,
            payment_hash = %updated.payment_hash,
            status = %updated.status,
            "sendpay resolved"
        );
        Ok(updated)
    }

    pub fn get_sendpay(&self, id: u64) -> Option<SendPayRecord> {
        self.sendpays.get(&id).map(|r| r.value().clone())
    }

    /// Records for `payment_hash`, oldest first.
    pub fn sendpays_for(&self, payment_hash: &PaymentHash) -> Vec<SendPayRecord> {
        self.list_sendpays(&SendPayFilter {
            payment_hash: Some(*payment_hash),
            bolt11: None,
        })
    }

    pub fn latest_sendpay(&self, payment_hash: &PaymentHash) -> Option<SendPayRecord> {
        self.sendpays_for(payment_hash).pop()
    }

    /// Records matching `filter`, in creation order.
    pub fn list_sendpays(&self, filter: &SendPayFilter) -> Vec<SendPayRecord> {
        let mut records: Vec<SendPayRecord> = self
            .sendpays
            .iter()
            .filter(|r| filter.payment_hash.map_or(true, |h| h == r.payment_hash))
            .filter(|r| {
                filter
                    .bolt11
                    .as_ref()
                    .map_or(true, |b| r.bolt11.as_ref() == Some(b))
            })
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn pending_sendpays(&self) -> Vec<SendPayRecord> {
        let mut records: Vec<SendPayRecord> = self
            .sendpays
            .iter()
            .filter(|r| r.status == SendPayStatus::Pending)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }

    // --- Pay status ---

    /// Persist a new pay status entry and return its id.
    pub fn begin_pay(&self, mut entry: PayStatusEntry) -> Result<u64> {
        entry.id = self.next_pay_id.fetch_add(1, Ordering::SeqCst);
        self.storage
            .put_json(CF_PAYSTATUS, &entry.id.to_be_bytes(), &entry)?;
        let id = entry.id;
        self.pays.insert(id, entry);
        Ok(id)
    }

    fn update_pay<F>(&self, id: u64, apply: F) -> Result<PayStatusEntry>
    where
        F: FnOnce(&mut PayStatusEntry) -> Result<()>,
    {
        let mut entry = self
            .pays
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("pay status {id} not found"))?;
        let mut updated = entry.clone();
        apply(&mut updated)?;
        self.storage
            .put_json(CF_PAYSTATUS, &id.to_be_bytes(), &updated)?;
        *entry = updated.clone();
        Ok(updated)
    }

    pub fn set_pay_state(&self, id: u64, state: PayState) -> Result<()> {
        self.update_pay(id, |entry| {
            entry.state = state;
            Ok(())
        })
        .map(|_| ())
    }

    /// Append an attempt and return its index.
    pub fn start_attempt(&self, id: u64, attempt: Attempt) -> Result<usize> {
        let entry = self.update_pay(id, |entry| {
            entry.attempts.push(attempt);
            Ok(())
        })?;
        Ok(entry.attempts.len() - 1)
    }

    /// Record the route an attempt is about to dispatch.
    pub fn set_attempt_route(&self, id: u64, index: usize, route: Route) -> Result<()> {
        self.update_pay(id, |entry| {
            let attempt = entry
                .attempts
                .get_mut(index)
                .ok_or_else(|| anyhow::anyhow!("attempt {index} of pay {id} not found"))?;
            attempt.route = Some(route);
            Ok(())
        })
        .map(|_| ())
    }

    pub fn finish_attempt(&self, id: u64, index: usize, outcome: AttemptOutcome) -> Result<()> {
        self.update_pay(id, |entry| {
            let attempt = entry
                .attempts
                .get_mut(index)
                .ok_or_else(|| anyhow::anyhow!("attempt {index} of pay {id} not found"))?;
            let elapsed = Utc::now() - attempt.start_time;
            attempt.duration_ms = Some(elapsed.num_milliseconds().max(0) as u64);
            attempt.outcome = outcome;
            Ok(())
        })
        .map(|_| ())
    }

    pub fn finish_pay(&self, id: u64, state: PayState, failure: Option<PayError>) -> Result<()> {
        self.update_pay(id, |entry| {
            entry.state = state;
            entry.failure = failure;
            Ok(())
        })
        .map(|_| ())
    }

    pub fn get_pay(&self, id: u64) -> Option<PayStatusEntry> {
        self.pays.get(&id).map(|p| p.value().clone())
    }

    /// Pay status entries, optionally only those for `bolt11`, in call order.
    pub fn pay_status(&self, bolt11: Option<&str>) -> Vec<PayStatusEntry> {
        let mut entries: Vec<PayStatusEntry> = self
            .pays
            .iter()
            .filter(|p| bolt11.map_or(true, |b| p.bolt11 == b))
            .map(|p| p.value().clone())
            .collect();
        entries.sort_by_key(|p| p.id);
        entries
    }

    /// Pay calls that never reached a final state, in call order.
    pub fn unfinished_pays(&self) -> Vec<PayStatusEntry> {
        let mut entries: Vec<PayStatusEntry> = self
            .pays
            .iter()
            .filter(|p| !p.state.is_final())
            .map(|p| p.value().clone())
            .collect();
        entries.sort_by_key(|p| p.id);
        entries
    }

    /// The stored failure of the most recent finished pay() of `bolt11`, if that
    /// call was exhausted with the same amount and limits.
    pub fn exhausted_with(&self, bolt11: &str, amount_msat: u64, params: &PayParams) -> Option<PayError> {
        let last = self
            .pay_status(Some(bolt11))
            .into_iter()
            .filter(|p| p.state.is_final())
            .last()?;
        if last.state == PayState::Exhausted
            && last.amount_msat == amount_msat
            && last.params == *params
        {
            return last.failure;
        }
        None
    }

    // --- Forwards ---

    pub fn put_forward(&self, forward: &ForwardedPayment) -> Result<()> {
        let key = format!("{}/{}", forward.in_channel, forward.in_htlc_id);
        self.storage.put_json(CF_FORWARDS, key.as_bytes(), forward)
    }

    pub fn forwards(&self) -> Result<Vec<ForwardedPayment>> {
        self.storage.load_json(CF_FORWARDS)
    }
}
