//! The payment service: every operation the node exposes, on top of the payment
//! store, the topology snapshot and the HTLC dispatcher.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use lnpay_core::{
    Invoice, NodeId, PayConfig, PayEvent, PayState, PayStateMachine, PaymentHash, ShortChannelId,
};
use lnpay_htlc::{
    ChannelFeePolicy, ChannelStats, DispatchOutcome, FailureCode, FeeChange, FeeTarget,
    ForwardFilter, ForwardedPayment, HtlcDispatcher, HtlcResolution, WireFailure,
};
use lnpay_routing::{
    ChannelGraph, ChannelUpdate, Route, RouteRequest, RouteSolver, RoutingError, SolverConfig,
    Topology, UpdateOutcome,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::error::PayError;
use crate::forwarder::{Forwarder, InboundHtlc};
use crate::pay::{PayRequest, PayResponse, RetryController};
use crate::store::{
    AttemptOutcome, NewSendPay, PayParams, PayStatusEntry, PaymentStore, SendPayFilter,
    SendPayRecord, SendPayStatus,
};

/// Summary returned by `getinfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub version: String,
    pub adapter: String,
    pub num_channels: usize,
    pub num_active_channels: usize,
    pub num_pending_payments: usize,
    pub num_forwards: usize,
    pub fees_collected_msat: u64,
}

struct ServiceInner {
    node_id: NodeId,
    config: PayConfig,
    store: Arc<PaymentStore>,
    graph: Arc<ChannelGraph>,
    solver: RouteSolver,
    dispatcher: Arc<dyn HtlcDispatcher>,
    fees: Arc<ChannelFeePolicy>,
    forwarder: Forwarder,
    /// Serializes pay/send per payment hash. Dropped by [`PaymentService::release`].
    locks: DashMap<PaymentHash, Arc<Mutex<()>>>,
    /// Bumped whenever a SendPay record for the hash is written.
    watchers: DashMap<PaymentHash, watch::Sender<u64>>,
}

/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct PaymentService {
    inner: Arc<ServiceInner>,
}

impl PaymentService {
    pub fn new(
        config: PayConfig,
        store: Arc<PaymentStore>,
        graph: Arc<ChannelGraph>,
        dispatcher: Arc<dyn HtlcDispatcher>,
        fees: Arc<ChannelFeePolicy>,
    ) -> anyhow::Result<Self> {
        let forwarder = Forwarder::new(store.clone(), fees.clone(), dispatcher.clone())?;
        let solver = RouteSolver::new(SolverConfig {
            max_hops: config.max_hops,
        });
        let node_id = dispatcher.node_id().clone();
        tracing::info!(
            node = %node_id,
            adapter = dispatcher.adapter_id(),
            edges = graph.len(),
            "payment service ready"
        );
        Ok(Self {
            inner: Arc::new(ServiceInner {
                node_id,
                config,
                store,
                graph,
                solver,
                dispatcher,
                fees,
                forwarder,
                locks: DashMap::new(),
                watchers: DashMap::new(),
            }),
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.inner.node_id
    }

    pub fn config(&self) -> &PayConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &PaymentStore {
        &self.inner.store
    }

    pub fn graph(&self) -> &ChannelGraph {
        &self.inner.graph
    }

    pub(crate) fn solve(&self, request: &RouteRequest) -> Result<Route, RoutingError> {
        self.inner.solver.solve(self.inner.graph.as_ref(), request)
    }

    pub(crate) fn apply_update(&self, update: &ChannelUpdate) -> Result<UpdateOutcome, RoutingError> {
        let outcome = self
            .inner
            .graph
            .apply_update(&update.short_channel_id, update)?;
        tracing::debug!(
            channel = %update.short_channel_id,
            outcome = ?outcome,
            "channel update applied"
        );
        Ok(outcome)
    }

    fn payment_lock(&self, payment_hash: &PaymentHash) -> Arc<Mutex<()>> {
        self.inner
            .locks
            .entry(*payment_hash)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    fn subscribe(&self, payment_hash: &PaymentHash) -> watch::Receiver<u64> {
        self.inner
            .watchers
            .entry(*payment_hash)
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }

    fn notify(&self, payment_hash: &PaymentHash) {
        if let Some(tx) = self.inner.watchers.get(payment_hash) {
            tx.send_modify(|version| *version += 1);
        }
    }

    /// Forget the lock and watcher of `payment_hash` once nothing is in flight for
    /// it and no caller still holds either.
    fn release(&self, payment_hash: &PaymentHash) {
        let in_flight = self
            .inner
            .store
            .latest_sendpay(payment_hash)
            .is_some_and(|r| r.status == SendPayStatus::Pending);
        if in_flight {
            return;
        }
        self.inner
            .locks
            .remove_if(payment_hash, |_, lock| Arc::strong_count(lock) == 1);
        self.inner
            .watchers
            .remove_if(payment_hash, |_, tx| tx.receiver_count() == 0);
    }

    // --- pay ---

    /// Pay an invoice, retrying until it succeeds or every strategy is used up.
    ///
    /// A hash that already completed is replayed without touching the network;
    /// a call identical to one that already exhausted fails with the same error.
    pub async fn pay(&self, request: PayRequest) -> Result<PayResponse, PayError> {
        let invoice = Invoice::decode(&request.bolt11)?;
        let amount_msat = match (invoice.amount_msat, request.amount_msat) {
            (Some(_), Some(_)) => return Err(PayError::invalid("msatoshi parameter unnecessary")),
            (None, None) => return Err(PayError::invalid("msatoshi parameter required")),
            (Some(amount), None) | (None, Some(amount)) => amount,
        };
        if invoice.is_expired(Utc::now()) {
            return Err(PayError::InvoiceExpired(invoice.expires_at()));
        }

        let params = request.params(&self.inner.config)?;
        let payment_hash = invoice.payment_hash;
        let bolt11 = request.bolt11.trim().to_string();

        let lock = self.payment_lock(&payment_hash);
        let result = {
            let _guard = lock.lock().await;
            self.pay_locked(&invoice, &bolt11, request.label, amount_msat, params)
                .await
        };
        drop(lock);
        self.release(&payment_hash);
        result
    }

    async fn pay_locked(
        &self,
        invoice: &Invoice,
        bolt11: &str,
        label: Option<String>,
        amount_msat: u64,
        params: PayParams,
    ) -> Result<PayResponse, PayError> {
        let payment_hash = invoice.payment_hash;
        if let Some(record) = self.settled_payment(&payment_hash, amount_msat).await? {
            tracing::info!(%payment_hash, "replaying completed payment");
            return Ok(PayResponse::from(&record));
        }
        if let Some(err) = self.inner.store.exhausted_with(bolt11, amount_msat, &params) {
            tracing::info!(%payment_hash, code = err.code(), "identical pay already exhausted");
            return Err(err);
        }

        let pay_id = self.inner.store.begin_pay(PayStatusEntry::new(
            bolt11.to_string(),
            payment_hash,
            invoice.payee.clone(),
            amount_msat,
            label.clone(),
            params,
        ))?;
        let record = RetryController::new(self, pay_id, invoice, bolt11, label, amount_msat, params)
            .run()
            .await?;
        Ok(PayResponse::from(&record))
    }

    /// The completed record for `payment_hash`, waiting out a pending one first.
    async fn settled_payment(
        &self,
        payment_hash: &PaymentHash,
        amount_msat: u64,
    ) -> Result<Option<SendPayRecord>, PayError> {
        let Some(latest) = self.inner.store.latest_sendpay(payment_hash) else {
            return Ok(None);
        };
        let record = match latest.status {
            SendPayStatus::Complete => latest,
            SendPayStatus::Pending => match self.await_outcome(*payment_hash).await {
                Ok(record) => record,
                Err(_) => return Ok(None),
            },
            SendPayStatus::Failed => return Ok(None),
        };
        if record.msatoshi < amount_msat {
            return Err(PayError::invalid(format!(
                "Already succeeded with amount {}msat",
                record.msatoshi
            )));
        }
        Ok(Some(record))
    }

    // --- sendpay / waitsendpay ---

    /// Dispatch `route` for `payment_hash` and return the pending record at once.
    /// Use [`PaymentService::await_outcome`] for the result.
    pub async fn send(
        &self,
        route: Route,
        payment_hash: PaymentHash,
        label: Option<String>,
        bolt11: Option<String>,
    ) -> Result<SendPayRecord, PayError> {
        let lock = self.payment_lock(&payment_hash);
        let result = {
            let _guard = lock.lock().await;
            self.send_unlocked(route, payment_hash, label, bolt11)
        };
        drop(lock);
        self.release(&payment_hash);
        result
    }

    /// Caller holds the payment lock for `payment_hash`.
    pub(crate) fn send_unlocked(
        &self,
        route: Route,
        payment_hash: PaymentHash,
        label: Option<String>,
        bolt11: Option<String>,
    ) -> Result<SendPayRecord, PayError> {
        route.validate()?;
        if let Some(latest) = self.inner.store.latest_sendpay(&payment_hash) {
            match latest.status {
                SendPayStatus::Complete if latest.msatoshi >= route.amount_delivered_msat() => {
                    tracing::info!(%payment_hash, "sendpay replays completed payment");
                    return Ok(latest);
                }
                SendPayStatus::Complete => {
                    return Err(PayError::invalid(format!(
                        "Already succeeded with amount {}msat",
                        latest.msatoshi
                    )))
                }
                SendPayStatus::Pending => return Err(PayError::InProgress(payment_hash)),
                SendPayStatus::Failed => {}
            }
        }

        let record = self.inner.store.insert_sendpay(NewSendPay {
            payment_hash,
            route,
            label,
            bolt11,
        })?;
        self.notify(&payment_hash);
        tracing::info!(
            %payment_hash,
            id = record.id,
            hops = record.route.len(),
            amount_sent_msat = record.amount_sent_msat,
            adapter = self.inner.dispatcher.adapter_id(),
            "dispatching payment"
        );

        let service = self.clone();
        let pending = record.clone();
        tokio::spawn(async move {
            let outcome = service
                .inner
                .dispatcher
                .dispatch(&pending.route, pending.payment_hash)
                .await;
            service.record_outcome(&pending, outcome);
        });
        Ok(record)
    }

    /// Wait until the latest SendPay for `payment_hash` is terminal.
    pub async fn await_outcome(&self, payment_hash: PaymentHash) -> Result<SendPayRecord, PayError> {
        let result = self.watch_outcome(payment_hash).await;
        self.release(&payment_hash);
        result
    }

    async fn watch_outcome(&self, payment_hash: PaymentHash) -> Result<SendPayRecord, PayError> {
        let mut changes = self.subscribe(&payment_hash);
        loop {
            let record = self
                .inner
                .store
                .latest_sendpay(&payment_hash)
                .ok_or(PayError::NoSuchPayment(payment_hash))?;
            match record.status {
                SendPayStatus::Complete => return Ok(record),
                SendPayStatus::Failed => return Err(failure_error(&record)),
                SendPayStatus::Pending => {}
            }
            if changes.changed().await.is_err() {
                return Err(PayError::Internal("payment watcher closed".into()));
            }
        }
    }

    fn record_outcome(&self, record: &SendPayRecord, outcome: DispatchOutcome) {
        let result = match outcome {
            Ok(preimage) if preimage.matches(&record.payment_hash) => {
                self.inner.store.complete_sendpay(record.id, preimage)
            }
            Ok(_) => self.inner.store.fail_sendpay(
                record.id,
                WireFailure::new(
                    FailureCode::IncorrectOrUnknownPaymentDetails,
                    record.destination.clone(),
                    "preimage does not match payment hash",
                ),
            ),
            Err(failure) => self.inner.store.fail_sendpay(record.id, failure),
        };
        if let Err(e) = result {
            tracing::error!(
                id = record.id,
                payment_hash = %record.payment_hash,
                error = %e,
                "could not record payment outcome"
            );
        }
        self.notify(&record.payment_hash);
        self.release(&record.payment_hash);
    }

    /// Drive every `pending` record left by a previous run to a terminal state
    /// using what the dispatcher knows. Nothing is re-sent.
    pub async fn reconcile_pending(&self) -> Result<usize, PayError> {
        let pending = self.inner.store.pending_sendpays();
        for record in &pending {
            let payment_hash = record.payment_hash;
            match self.inner.dispatcher.outstanding(&payment_hash).await {
                HtlcResolution::Fulfilled(preimage) => self.record_outcome(record, Ok(preimage)),
                HtlcResolution::Failed(failure) => self.record_outcome(record, Err(failure)),
                HtlcResolution::Unknown => {
                    self.record_outcome(record, Err(never_left(&self.inner.node_id)))
                }
                HtlcResolution::InFlight => {
                    tracing::info!(%payment_hash, id = record.id, "waiting on in-flight htlc");
                    let service = self.clone();
                    let record = record.clone();
                    tokio::spawn(async move {
                        let outcome = service
                            .inner
                            .dispatcher
                            .await_resolution(&record.payment_hash)
                            .await
                            .unwrap_or_else(|| Err(never_left(&service.inner.node_id)));
                        service.record_outcome(&record, outcome);
                    });
                }
            }
        }
        tracing::info!(count = pending.len(), "reconciled pending payments");
        self.close_interrupted_pays();
        Ok(pending.len())
    }

    /// Finish every pay() call a previous run left open, from the outcome of the
    /// latest SendPay for its hash. Calls still in flight finish in the background.
    fn close_interrupted_pays(&self) {
        let open = self.inner.store.unfinished_pays();
        for entry in open.iter().cloned() {
            let latest = self.inner.store.latest_sendpay(&entry.payment_hash);
            let outcome = match latest {
                Some(record) if record.status == SendPayStatus::Pending => {
                    let service = self.clone();
                    tokio::spawn(async move {
                        let outcome = service.await_outcome(entry.payment_hash).await;
                        service.close_interrupted_pay(&entry, outcome);
                    });
                    continue;
                }
                Some(record) if record.status == SendPayStatus::Complete => Ok(record),
                Some(record) => Err(failure_error(&record)),
                None => Err(PayError::Internal(
                    "node stopped before the payment was dispatched".into(),
                )),
            };
            self.close_interrupted_pay(&entry, outcome);
        }
        if !open.is_empty() {
            tracing::info!(count = open.len(), "closed interrupted pay calls");
        }
    }

    fn close_interrupted_pay(&self, entry: &PayStatusEntry, outcome: Result<SendPayRecord, PayError>) {
        if let Err(e) = self.try_close_interrupted_pay(entry, outcome) {
            tracing::error!(
                pay_id = entry.id,
                payment_hash = %entry.payment_hash,
                error = %e,
                "could not close interrupted pay call"
            );
        }
    }

    fn try_close_interrupted_pay(
        &self,
        entry: &PayStatusEntry,
        outcome: Result<SendPayRecord, PayError>,
    ) -> Result<(), PayError> {
        let store = &self.inner.store;
        let (event, attempt, failure) = match outcome {
            Ok(record) => {
                let payment_preimage = record.payment_preimage.ok_or_else(|| {
                    PayError::Internal("complete payment without preimage".into())
                })?;
                (PayEvent::Fulfilled, AttemptOutcome::Success { payment_preimage }, None)
            }
            Err(err) => (PayEvent::Interrupt, AttemptOutcome::Failure((&err).into()), Some(err)),
        };
        let event = match entry.state {
            PayState::Initial => PayEvent::Interrupt,
            _ => event,
        };
        if let Some(index) = entry
            .attempts
            .iter()
            .rposition(|a| a.outcome == AttemptOutcome::Pending)
        {
            store.finish_attempt(entry.id, index, attempt)?;
        }
        let state = PayStateMachine::transition(entry.state, event)?;
        store.finish_pay(entry.id, state, failure)?;
        tracing::info!(
            pay_id = entry.id,
            payment_hash = %entry.payment_hash,
            state = %state,
            "interrupted pay call closed"
        );
        Ok(())
    }

    // --- queries ---

    pub fn list_payments(&self, filter: &SendPayFilter) -> Vec<SendPayRecord> {
        self.inner.store.list_sendpays(filter)
    }

    pub fn payment_status(&self, bolt11: Option<&str>) -> Vec<PayStatusEntry> {
        self.inner.store.pay_status(bolt11.map(str::trim))
    }

    pub fn list_forwards(&self, filter: &ForwardFilter) -> Vec<ForwardedPayment> {
        self.inner.forwarder.ledger().list(filter)
    }

    pub fn forward_stats(&self, scid: &ShortChannelId) -> ChannelStats {
        self.inner.forwarder.ledger().channel_stats(scid)
    }

    pub fn fees_collected_msat(&self) -> u64 {
        self.inner.forwarder.ledger().fees_collected_msat()
    }

    pub async fn get_info(&self) -> NodeInfo {
        let channels = self.inner.dispatcher.local_channels().await;
        NodeInfo {
            id: self.inner.node_id.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            adapter: self.inner.dispatcher.adapter_id().to_string(),
            num_channels: channels.len(),
            num_active_channels: channels.iter().filter(|c| c.is_normal()).count(),
            num_pending_payments: self.inner.store.pending_sendpays().len(),
            num_forwards: self.inner.forwarder.ledger().len(),
            fees_collected_msat: self.fees_collected_msat(),
        }
    }

    // --- forwarding ---

    /// Set forwarding fees for a channel, a peer's channels, or `all`. The resulting
    /// channel updates are applied to the local topology snapshot.
    pub async fn set_channel_fee(
        &self,
        target: &str,
        base: Option<i64>,
        ppm: Option<i64>,
    ) -> Result<FeeChange, PayError> {
        let target: FeeTarget = target.parse()?;
        let channels = self.inner.dispatcher.local_channels().await;
        let change = self
            .inner
            .fees
            .set_channel_fee(&self.inner.node_id, &channels, &target, base, ppm)?;
        for update in &change.updates {
            if let Err(e) = self.apply_update(update) {
                tracing::debug!(channel = %update.short_channel_id, error = %e, "own update not in graph");
            }
        }
        Ok(change)
    }

    pub async fn forward(&self, htlc: InboundHtlc) -> Result<ForwardedPayment, PayError> {
        self.inner.forwarder.forward(htlc).await
    }

    pub fn force_resolve_timeout(
        &self,
        in_channel: ShortChannelId,
        in_htlc_id: u64,
    ) -> Result<ForwardedPayment, PayError> {
        self.inner.forwarder.force_resolve_timeout(in_channel, in_htlc_id)
    }
}

fn failure_error(record: &SendPayRecord) -> PayError {
    match &record.failure {
        Some(failure) if failure.erring_node == record.destination => {
            PayError::DestinationPermFail(failure.clone())
        }
        Some(failure) => PayError::TryOtherRoute(failure.clone()),
        None => PayError::Internal(format!("payment {} failed without detail", record.id)),
    }
}

fn never_left(local: &NodeId) -> WireFailure {
    WireFailure::new(
        FailureCode::TemporaryChannelFailure,
        local.clone(),
        "HTLC never left this node",
    )
}
