use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lnpay_core::invoice::DEFAULT_EXPIRY_SECS;
use lnpay_core::{Invoice, NodeId, PaymentHash, Preimage, RouteHint};
use serde::{Deserialize, Serialize};

use crate::error::HtlcError;
use crate::types::FailureCode;

/// Payment state of an issued invoice. `Paid` and `Expired` are both final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unpaid,
    Paid,
    Expired,
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unpaid => write!(f, "unpaid"),
            Self::Paid => write!(f, "paid"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// An invoice this node issued, with its receive-side state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRecord {
    /// Creation order.
    pub id: u64,
    pub label: String,
    pub bolt11: String,
    pub invoice: Invoice,
    pub preimage: Preimage,
    pub status: InvoiceStatus,
    /// Assigned from a monotonic counter when the invoice is paid.
    pub pay_index: Option<u64>,
    pub paid_at: Option<DateTime<Utc>>,
    pub received_msat: Option<u64>,
}

/// Parameters for [`InvoiceRegistry::create`].
#[derive(Debug, Clone, Default)]
pub struct NewInvoice {
    pub label: String,
    pub amount_msat: Option<u64>,
    pub description: String,
    pub expiry_secs: Option<u64>,
    pub min_final_cltv_expiry: u32,
    pub route_hints: Vec<RouteHint>,
    /// Use this preimage instead of a random one.
    pub preimage: Option<Preimage>,
}

/// Invoices issued by one node, keyed by payment hash with a label index.
pub struct InvoiceRegistry {
    payee: NodeId,
    invoices: DashMap<PaymentHash, InvoiceRecord>,
    labels: DashMap<String, PaymentHash>,
    next_id: AtomicU64,
    next_pay_index: AtomicU64,
}

impl InvoiceRegistry {
    pub fn new(payee: NodeId) -> Self {
        Self {
            payee,
            invoices: DashMap::new(),
            labels: DashMap::new(),
            next_id: AtomicU64::new(1),
            next_pay_index: AtomicU64::new(1),
        }
    }

    pub fn payee(&self) -> &NodeId {
        &self.payee
    }

    /// Issue a new invoice. Labels are unique per registry.
    pub fn create(&self, params: NewInvoice) -> Result<InvoiceRecord, HtlcError> {
        if params.amount_msat == Some(0) {
            return Err(HtlcError::InvalidAmount("amount must be positive".into()));
        }
        let preimage = params.preimage.unwrap_or_else(Preimage::random);
        let invoice = Invoice {
            payment_hash: preimage.payment_hash(),
            amount_msat: params.amount_msat,
            description: params.description,
            timestamp: Utc::now(),
            expiry_secs: params.expiry_secs.unwrap_or(DEFAULT_EXPIRY_SECS),
            min_final_cltv_expiry: params.min_final_cltv_expiry,
            payee: self.payee.clone(),
            route_hints: params.route_hints,
        };
        let bolt11 = invoice.encode()?;

        // Reserve the label first so two concurrent creates cannot both win.
        match self.labels.entry(params.label.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(HtlcError::DuplicateLabel(params.label));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(invoice.payment_hash);
            }
        }

        let record = InvoiceRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            label: params.label,
            bolt11,
            invoice,
            preimage,
            status: InvoiceStatus::Unpaid,
            pay_index: None,
            paid_at: None,
            received_msat: None,
        };
        self.invoices
            .insert(record.invoice.payment_hash, record.clone());

        tracing::debug!(
            label = %record.label,
            payment_hash = %record.invoice.payment_hash,
            amount_msat = ?record.invoice.amount_msat,
            "invoice created"
        );
        Ok(record)
    }

    pub fn get(&self, payment_hash: &PaymentHash) -> Option<InvoiceRecord> {
        self.invoices.get(payment_hash).map(|r| r.value().clone())
    }

    pub fn get_by_label(&self, label: &str) -> Option<InvoiceRecord> {
        let hash = *self.labels.get(label)?;
        self.get(&hash)
    }

    /// All invoices in creation order.
    pub fn list(&self) -> Vec<InvoiceRecord> {
        let mut records: Vec<InvoiceRecord> =
            self.invoices.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Validate an incoming HTLC against the invoice and, if acceptable, mark the
    /// invoice paid and release the preimage.
    pub fn accept_htlc(
        &self,
        payment_hash: &PaymentHash,
        amount_msat: u64,
        delay: u32,
        now: DateTime<Utc>,
    ) -> Result<Preimage, FailureCode> {
        let mut entry = self
            .invoices
            .get_mut(payment_hash)
            .ok_or(FailureCode::IncorrectOrUnknownPaymentDetails)?;
        let record = entry.value_mut();

        if record.status == InvoiceStatus::Unpaid && record.invoice.is_expired(now) {
            record.status = InvoiceStatus::Expired;
        }
        if record.status != InvoiceStatus::Unpaid {
            return Err(FailureCode::IncorrectOrUnknownPaymentDetails);
        }
        if amount_msat == 0 {
            return Err(FailureCode::AmountBelowMinimum);
        }
        if let Some(expected) = record.invoice.amount_msat {
            if amount_msat < expected {
                return Err(FailureCode::AmountBelowMinimum);
            }
            if amount_msat > expected.saturating_mul(2) {
                return Err(FailureCode::IncorrectOrUnknownPaymentDetails);
            }
        }
        if delay < record.invoice.min_final_cltv_expiry {
            return Err(FailureCode::FinalExpiryTooSoon);
        }

        Self::mark_paid(record, &self.next_pay_index, amount_msat, now);
        Ok(record.preimage)
    }

    /// Mark an unpaid invoice paid without amount checks.
    pub fn resolve(
        &self,
        payment_hash: &PaymentHash,
        received_msat: u64,
    ) -> Result<InvoiceRecord, HtlcError> {
        let mut entry = self
            .invoices
            .get_mut(payment_hash)
            .ok_or_else(|| HtlcError::UnknownInvoice(payment_hash.to_hex()))?;
        let record = entry.value_mut();
        if record.status != InvoiceStatus::Unpaid {
            return Err(HtlcError::InvoiceNotUnpaid {
                label: record.label.clone(),
                status: record.status,
            });
        }
        Self::mark_paid(record, &self.next_pay_index, received_msat, Utc::now());
        Ok(record.clone())
    }

    // The shard lock on `record` is held here, so the pay_index order is the
    // order in which invoices were actually marked paid.
    fn mark_paid(
        record: &mut InvoiceRecord,
        counter: &AtomicU64,
        received_msat: u64,
        now: DateTime<Utc>,
    ) {
        record.status = InvoiceStatus::Paid;
        record.pay_index = Some(counter.fetch_add(1, Ordering::SeqCst));
        record.paid_at = Some(now);
        record.received_msat = Some(received_msat);
        tracing::info!(
            label = %record.label,
            pay_index = ?record.pay_index,
            received_msat,
            "invoice paid"
        );
    }

    /// Move every unpaid invoice past its expiry to `expired`. Returns their labels.
    pub fn expire_due(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut expired = Vec::new();
        for mut entry in self.invoices.iter_mut() {
            let record = entry.value_mut();
            if record.status == InvoiceStatus::Unpaid && record.invoice.is_expired(now) {
                record.status = InvoiceStatus::Expired;
                expired.push(record.label.clone());
            }
        }
        expired
    }

    /// Delete expired invoices whose expiry lies before `cutoff`.
    pub fn delete_expired(&self, cutoff: DateTime<Utc>) -> usize {
        self.expire_due(Utc::now());
        let doomed: Vec<(PaymentHash, String)> = self
            .invoices
            .iter()
            .filter(|r| r.status == InvoiceStatus::Expired && r.invoice.expires_at() < cutoff)
            .map(|r| (*r.key(), r.label.clone()))
            .collect();
        for (hash, label) in &doomed {
            self.invoices.remove(hash);
            self.labels.remove(label);
        }
        if !doomed.is_empty() {
            tracing::info!(deleted = doomed.len(), "deleted expired invoices");
        }
        doomed.len()
    }
}
