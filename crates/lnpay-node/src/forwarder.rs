//! Relaying HTLCs for other payers.
//!
//! An inbound HTLC is recorded as `offered` before anything else happens, checked
//! against the outgoing channel and this node's fee policy, then sent onward.
//! Every ledger transition is written to the payment store.

use std::sync::Arc;

use lnpay_core::{NodeId, PaymentHash, ShortChannelId};
use lnpay_htlc::{
    ChannelFeePolicy, FailureCode, ForwardState, ForwardedPayment, ForwardingLedger,
    HtlcDispatcher,
};
use lnpay_routing::{Route, RouteHop};
use serde::{Deserialize, Serialize};

use crate::error::PayError;
use crate::store::PaymentStore;

/// An HTLC offered to this node on `in_channel` together with the onward route
/// decoded from its onion. `onward` starts at the next hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundHtlc {
    pub in_channel: ShortChannelId,
    pub in_htlc_id: u64,
    pub amount_msat: u64,
    pub cltv_expiry: u32,
    pub payment_hash: PaymentHash,
    pub onward: Route,
}

pub struct Forwarder {
    node_id: NodeId,
    ledger: ForwardingLedger,
    store: Arc<PaymentStore>,
    fees: Arc<ChannelFeePolicy>,
    dispatcher: Arc<dyn HtlcDispatcher>,
}

impl Forwarder {
    /// Load persisted forwards and continue their ledger.
    pub fn new(
        store: Arc<PaymentStore>,
        fees: Arc<ChannelFeePolicy>,
        dispatcher: Arc<dyn HtlcDispatcher>,
    ) -> anyhow::Result<Self> {
        let records = store.forwards()?;
        tracing::debug!(forwards = records.len(), "forwarding ledger loaded");
        Ok(Self {
            node_id: dispatcher.node_id().clone(),
            ledger: ForwardingLedger::from_records(records),
            store,
            fees,
            dispatcher,
        })
    }

    pub fn ledger(&self) -> &ForwardingLedger {
        &self.ledger
    }

    /// Accept `htlc` for forwarding and drive it to a terminal state. Suspends
    /// while the onward HTLC is outstanding; the record stays `offered` until then.
    pub async fn forward(&self, htlc: InboundHtlc) -> Result<ForwardedPayment, PayError> {
        let next = htlc.onward.first_hop().cloned();
        let offered = self.ledger.offer(
            htlc.in_channel,
            htlc.in_htlc_id,
            next.as_ref().map(|h| h.short_channel_id),
            htlc.payment_hash,
            htlc.amount_msat,
            next.as_ref().map_or(0, |h| h.amount_msat),
        )?;
        self.store.put_forward(&offered)?;
        tracing::debug!(
            node = %self.node_id,
            in_channel = %htlc.in_channel,
            in_htlc_id = htlc.in_htlc_id,
            payment_hash = %htlc.payment_hash,
            "forward offered"
        );

        if let Err((state, code)) = self.check(&htlc, next.as_ref()).await {
            tracing::info!(
                in_channel = %htlc.in_channel,
                in_htlc_id = htlc.in_htlc_id,
                failcode = %code,
                "forward rejected"
            );
            return self.resolve(htlc.in_channel, htlc.in_htlc_id, state, Some(code));
        }

        match self.dispatcher.dispatch(&htlc.onward, htlc.payment_hash).await {
            Ok(_) => self.resolve(htlc.in_channel, htlc.in_htlc_id, ForwardState::Settled, None),
            Err(failure) => {
                tracing::info!(
                    in_channel = %htlc.in_channel,
                    in_htlc_id = htlc.in_htlc_id,
                    error = %failure,
                    "onward htlc failed"
                );
                self.resolve(
                    htlc.in_channel,
                    htlc.in_htlc_id,
                    ForwardState::Failed,
                    Some(failure.code),
                )
            }
        }
    }

    /// The outgoing HTLC timed out on chain: fail the inbound side locally.
    pub fn force_resolve_timeout(
        &self,
        in_channel: ShortChannelId,
        in_htlc_id: u64,
    ) -> Result<ForwardedPayment, PayError> {
        tracing::warn!(%in_channel, in_htlc_id, "force-resolving timed out forward");
        self.resolve(in_channel, in_htlc_id, ForwardState::LocalFailed, None)
    }

    async fn check(
        &self,
        htlc: &InboundHtlc,
        next: Option<&RouteHop>,
    ) -> Result<(), (ForwardState, FailureCode)> {
        let Some(next) = next else {
            return Err((ForwardState::Failed, FailureCode::InvalidOnionHmac));
        };

        let channels = self.dispatcher.local_channels().await;
        let channel = channels
            .iter()
            .find(|c| c.short_channel_id == next.short_channel_id && c.peer == next.node_id)
            .ok_or((ForwardState::Failed, FailureCode::UnknownNextPeer))?;
        if !channel.is_normal() {
            return Err((ForwardState::LocalFailed, FailureCode::PermanentChannelFailure));
        }

        let schedule = self.fees.effective(&next.short_channel_id);
        let required = next
            .amount_msat
            .saturating_add(schedule.fee_msat(next.amount_msat));
        if htlc.amount_msat < required {
            return Err((ForwardState::Failed, FailureCode::FeeInsufficient));
        }
        if htlc.cltv_expiry < next.delay.saturating_add(schedule.cltv_delta) {
            return Err((ForwardState::Failed, FailureCode::IncorrectCltvExpiry));
        }
        if channel.spendable_msat < next.amount_msat {
            return Err((ForwardState::Failed, FailureCode::TemporaryChannelFailure));
        }
        Ok(())
    }

    fn resolve(
        &self,
        in_channel: ShortChannelId,
        in_htlc_id: u64,
        state: ForwardState,
        failcode: Option<FailureCode>,
    ) -> Result<ForwardedPayment, PayError> {
        let record = self.ledger.resolve(in_channel, in_htlc_id, state, failcode)?;
        self.store.put_forward(&record)?;
        tracing::info!(
            %in_channel,
            in_htlc_id,
            state = %record.state,
            fee_msat = record.fee_msat(),
            "forward resolved"
        );
        Ok(record)
    }
}
