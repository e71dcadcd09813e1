use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lnpay_core::{NodeId, PaymentHash, ShortChannelId};
use lnpay_routing::{ChannelEdge, ChannelUpdate, Route, RouteHop};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};

use crate::error::HtlcError;
use crate::fees::{ChannelFeePolicy, ChannelState, FeeChange, FeeSchedule, FeeTarget, LocalChannel};
use crate::forwards::{ForwardState, ForwardingLedger};
use crate::invoices::InvoiceRegistry;
use crate::traits::HtlcDispatcher;
use crate::types::{DispatchOutcome, FailureCode, HtlcResolution, WireFailure};

/// A node of the simulated network with its own fee policy, invoices and
/// forwarding ledger.
struct SimNode {
    id: NodeId,
    fees: Arc<ChannelFeePolicy>,
    invoices: Arc<InvoiceRegistry>,
    forwards: Arc<ForwardingLedger>,
    online: AtomicBool,
    hold_htlcs: AtomicBool,
    next_htlc_id: AtomicU64,
}

/// Both directions of one channel and the balance on each side.
#[derive(Debug, Clone)]
struct SimChannel {
    node_a: NodeId,
    node_b: NodeId,
    balance_a_msat: u64,
    balance_b_msat: u64,
    open: bool,
}

impl SimChannel {
    fn peer_of(&self, node: &NodeId) -> Option<&NodeId> {
        if *node == self.node_a {
            Some(&self.node_b)
        } else if *node == self.node_b {
            Some(&self.node_a)
        } else {
            None
        }
    }

    fn balance_mut(&mut self, node: &NodeId) -> Option<&mut u64> {
        if *node == self.node_a {
            Some(&mut self.balance_a_msat)
        } else if *node == self.node_b {
            Some(&mut self.balance_b_msat)
        } else {
            None
        }
    }

    fn spendable(&self, node: &NodeId) -> u64 {
        if *node == self.node_a {
            self.balance_a_msat
        } else if *node == self.node_b {
            self.balance_b_msat
        } else {
            0
        }
    }
}

/// Amount taken from `from`'s side of a channel while an HTLC is outstanding.
struct Lock {
    scid: ShortChannelId,
    from: NodeId,
    amount_msat: u64,
}

/// A channel in a [`NetworkDescription`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDescription {
    pub short_channel_id: ShortChannelId,
    pub node_a: NodeId,
    pub node_b: NodeId,
    pub balance_a_msat: u64,
    pub balance_b_msat: u64,
}

/// Serializable layout of a simulated network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDescription {
    pub nodes: Vec<NodeId>,
    pub channels: Vec<ChannelDescription>,
}

/// In-process network of nodes connected by channels.
///
/// Every intermediate node checks relay fee, CLTV margin and liquidity against its
/// own current policy, so a payer routing on stale gossip gets the same relay
/// errors (with embedded channel updates) it would see on a real network.
/// Balances are locked per hop while an HTLC is outstanding and move on fulfilment.
pub struct SimulatedNetwork {
    local: NodeId,
    defaults: FeeSchedule,
    nodes: DashMap<NodeId, Arc<SimNode>>,
    channels: DashMap<ShortChannelId, SimChannel>,
    resolutions: DashMap<PaymentHash, watch::Sender<HtlcResolution>>,
    held: DashMap<PaymentHash, oneshot::Sender<()>>,
    dispatches: AtomicUsize,
}

impl SimulatedNetwork {
    /// A network containing only `local`, the node payments are sent from.
    pub fn new(local: NodeId, defaults: FeeSchedule) -> Self {
        let network = Self {
            local: local.clone(),
            defaults,
            nodes: DashMap::new(),
            channels: DashMap::new(),
            resolutions: DashMap::new(),
            held: DashMap::new(),
            dispatches: AtomicUsize::new(0),
        };
        network.add_node(local);
        network
    }

    pub fn from_description(
        local: NodeId,
        defaults: FeeSchedule,
        description: &NetworkDescription,
    ) -> Result<Self, HtlcError> {
        let network = Self::new(local, defaults);
        for node in &description.nodes {
            network.add_node(node.clone());
        }
        for channel in &description.channels {
            network.open_channel(
                channel.short_channel_id,
                &channel.node_a,
                &channel.node_b,
                channel.balance_a_msat,
                channel.balance_b_msat,
            )?;
        }
        Ok(network)
    }

    /// Add a node using the network's default fee schedule. No-op if it exists.
    pub fn add_node(&self, id: NodeId) {
        if self.nodes.contains_key(&id) {
            return;
        }
        let node = SimNode {
            id: id.clone(),
            fees: Arc::new(ChannelFeePolicy::new(self.defaults)),
            invoices: Arc::new(InvoiceRegistry::new(id.clone())),
            forwards: Arc::new(ForwardingLedger::new()),
            online: AtomicBool::new(true),
            hold_htlcs: AtomicBool::new(false),
            next_htlc_id: AtomicU64::new(0),
        };
        self.nodes.insert(id, Arc::new(node));
    }

    pub fn open_channel(
        &self,
        scid: ShortChannelId,
        node_a: &NodeId,
        node_b: &NodeId,
        balance_a_msat: u64,
        balance_b_msat: u64,
    ) -> Result<(), HtlcError> {
        for node in [node_a, node_b] {
            if !self.nodes.contains_key(node) {
                return Err(HtlcError::UnknownNode(node.clone()));
            }
        }
        self.channels.insert(
            scid,
            SimChannel {
                node_a: node_a.clone(),
                node_b: node_b.clone(),
                balance_a_msat,
                balance_b_msat,
                open: true,
            },
        );
        tracing::debug!(channel = %scid, %node_a, %node_b, "simulated channel opened");
        Ok(())
    }

    pub fn close_channel(&self, scid: &ShortChannelId) -> Result<(), HtlcError> {
        let mut channel = self
            .channels
            .get_mut(scid)
            .ok_or(HtlcError::UnknownChannel(*scid))?;
        channel.open = false;
        tracing::debug!(channel = %scid, "simulated channel closed");
        Ok(())
    }

    pub fn set_online(&self, node: &NodeId, online: bool) -> Result<(), HtlcError> {
        self.node(node)?.online.store(online, Ordering::SeqCst);
        Ok(())
    }

    /// While set, HTLCs arriving at `node` as the final hop are held until
    /// [`release_held`](Self::release_held) is called for their payment hash.
    pub fn set_hold_htlcs(&self, node: &NodeId, hold: bool) -> Result<(), HtlcError> {
        self.node(node)?.hold_htlcs.store(hold, Ordering::SeqCst);
        Ok(())
    }

    /// Let a held HTLC proceed to the payee. Returns whether one was held.
    pub fn release_held(&self, payment_hash: &PaymentHash) -> bool {
        match self.held.remove(payment_hash) {
            Some((_, tx)) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Whether an HTLC for `payment_hash` is currently held at its payee.
    pub fn is_held(&self, payment_hash: &PaymentHash) -> bool {
        self.held.contains_key(payment_hash)
    }

    pub fn invoices(&self, node: &NodeId) -> Result<Arc<InvoiceRegistry>, HtlcError> {
        Ok(self.node(node)?.invoices.clone())
    }

    pub fn forwards(&self, node: &NodeId) -> Result<Arc<ForwardingLedger>, HtlcError> {
        Ok(self.node(node)?.forwards.clone())
    }

    pub fn fee_policy(&self, node: &NodeId) -> Result<Arc<ChannelFeePolicy>, HtlcError> {
        Ok(self.node(node)?.fees.clone())
    }

    /// Channels `node` is party to, ordered by short channel id.
    pub fn channels_of(&self, node: &NodeId) -> Vec<LocalChannel> {
        let mut channels: Vec<LocalChannel> = self
            .channels
            .iter()
            .filter_map(|entry| {
                let channel = entry.value();
                let peer = channel.peer_of(node)?.clone();
                Some(LocalChannel {
                    short_channel_id: *entry.key(),
                    peer,
                    state: if channel.open {
                        ChannelState::ChanneldNormal
                    } else {
                        ChannelState::Closed
                    },
                    spendable_msat: channel.spendable(node),
                })
            })
            .collect();
        channels.sort_by_key(|c| c.short_channel_id);
        channels
    }

    /// `setchannelfee` on behalf of `node`.
    pub fn set_channel_fee(
        &self,
        node: &NodeId,
        target: &FeeTarget,
        base: Option<i64>,
        ppm: Option<i64>,
    ) -> Result<FeeChange, HtlcError> {
        let sim = self.node(node)?;
        sim.fees
            .set_channel_fee(node, &self.channels_of(node), target, base, ppm)
    }

    pub fn channel_update(&self, node: &NodeId, scid: ShortChannelId) -> Result<ChannelUpdate, HtlcError> {
        let sim = self.node(node)?;
        let open = self
            .channels
            .get(&scid)
            .ok_or(HtlcError::UnknownChannel(scid))?
            .open;
        Ok(sim.fees.channel_update(node, scid, open))
    }

    /// Both directions of every open channel with each side's current policy.
    pub fn gossip(&self) -> Vec<ChannelEdge> {
        let now = Utc::now();
        let mut edges = Vec::new();
        for entry in self.channels.iter() {
            let channel = entry.value();
            if !channel.open {
                continue;
            }
            let scid = *entry.key();
            for (from, to) in [
                (&channel.node_a, &channel.node_b),
                (&channel.node_b, &channel.node_a),
            ] {
                let Some(sim) = self.nodes.get(from).map(|n| n.value().clone()) else {
                    continue;
                };
                let schedule = sim.fees.effective(&scid);
                edges.push(ChannelEdge {
                    from: from.clone(),
                    to: to.clone(),
                    short_channel_id: scid,
                    fee_base_msat: schedule.fee_base_msat,
                    fee_proportional_millionths: schedule.fee_proportional_millionths,
                    cltv_delta: schedule.cltv_delta,
                    active: true,
                    last_update: now,
                });
            }
        }
        edges.sort_by(|a, b| (a.short_channel_id, &a.from).cmp(&(b.short_channel_id, &b.from)));
        edges
    }

    /// What `node` can currently send over `scid`.
    pub fn balance(&self, scid: &ShortChannelId, node: &NodeId) -> Option<u64> {
        let channel = self.channels.get(scid)?;
        channel.peer_of(node)?;
        Some(channel.spendable(node))
    }

    /// Number of routes handed to [`HtlcDispatcher::dispatch`] so far.
    pub fn dispatch_count(&self) -> usize {
        self.dispatches.load(Ordering::SeqCst)
    }

    fn node(&self, id: &NodeId) -> Result<Arc<SimNode>, HtlcError> {
        self.nodes
            .get(id)
            .map(|n| n.value().clone())
            .ok_or_else(|| HtlcError::UnknownNode(id.clone()))
    }

    fn is_online(&self, id: &NodeId) -> bool {
        self.nodes
            .get(id)
            .map_or(false, |n| n.online.load(Ordering::SeqCst))
    }

    fn publish(&self, payment_hash: PaymentHash, resolution: HtlcResolution) {
        match self.resolutions.entry(payment_hash) {
            Entry::Occupied(slot) => {
                slot.get().send_replace(resolution);
            }
            Entry::Vacant(slot) => {
                let (tx, _rx) = watch::channel(resolution);
                slot.insert(tx);
            }
        }
    }

    /// Offer `next` over its channel from `from`: the channel must lead to the next
    /// node, that node must be online, and `from` must be able to afford it. When
    /// `incoming` is set, `from` is forwarding and also checks its relay fee and
    /// CLTV margin against it.
    fn hand_over(
        &self,
        from: &SimNode,
        index: Option<usize>,
        incoming: Option<&RouteHop>,
        next: &RouteHop,
        locked: &mut Vec<Lock>,
    ) -> Result<(), WireFailure> {
        let scid = next.short_channel_id;
        let fail = |code: FailureCode, message: String, update: Option<ChannelUpdate>| {
            let mut failure = WireFailure::new(code, from.id.clone(), message).on_channel(scid);
            if let Some(i) = index {
                failure = failure.at_hop(i);
            }
            match update {
                Some(update) => failure.with_update(update),
                None => failure,
            }
        };
        // The payer knows its own channels; only forwarding nodes report updates.
        let update = |active: bool| {
            index.map(|_| from.fees.channel_update(&from.id, scid, active))
        };

        let mut channel = match self.channels.get_mut(&scid) {
            Some(c) if c.open && c.peer_of(&from.id) == Some(&next.node_id) => c,
            _ => {
                return Err(fail(
                    FailureCode::UnknownNextPeer,
                    format!("no open channel {scid} to {}", next.node_id),
                    None,
                ))
            }
        };

        if !self.is_online(&next.node_id) {
            let message = if index.is_none() {
                "First peer not ready".to_string()
            } else {
                format!("peer {} not connected", next.node_id)
            };
            return Err(fail(FailureCode::TemporaryChannelFailure, message, update(false)));
        }

        if let Some(incoming) = incoming {
            let schedule = from.fees.effective(&scid);
            let required = next
                .amount_msat
                .saturating_add(schedule.fee_msat(next.amount_msat));
            if incoming.amount_msat < required {
                return Err(fail(
                    FailureCode::FeeInsufficient,
                    format!("got {}msat, need {required}msat", incoming.amount_msat),
                    update(true),
                ));
            }
            if incoming.delay < next.delay.saturating_add(schedule.cltv_delta) {
                return Err(fail(
                    FailureCode::IncorrectCltvExpiry,
                    format!(
                        "delay {} leaves less than {} blocks over {}",
                        incoming.delay, schedule.cltv_delta, next.delay
                    ),
                    update(true),
                ));
            }
        }

        match channel.balance_mut(&from.id) {
            Some(balance) if *balance >= next.amount_msat => {
                *balance -= next.amount_msat;
            }
            _ => {
                return Err(fail(
                    FailureCode::TemporaryChannelFailure,
                    format!("insufficient capacity on {scid}"),
                    update(true),
                ))
            }
        }
        locked.push(Lock {
            scid,
            from: from.id.clone(),
            amount_msat: next.amount_msat,
        });
        Ok(())
    }

    async fn relay(
        &self,
        route: &Route,
        payment_hash: PaymentHash,
        forwards: &mut Vec<(Arc<SimNode>, ShortChannelId, u64)>,
        locked: &mut Vec<Lock>,
    ) -> DispatchOutcome {
        let local = self.node(&self.local).map_err(|e| {
            WireFailure::new(FailureCode::PermanentChannelFailure, self.local.clone(), e.to_string())
        })?;
        let first = route.first_hop().ok_or_else(|| {
            WireFailure::new(
                FailureCode::PermanentChannelFailure,
                self.local.clone(),
                "route has no hops",
            )
        })?;
        self.hand_over(&local, None, None, first, locked)?;

        for (i, hop) in route.hops.iter().enumerate() {
            let node = self.node(&hop.node_id).map_err(|e| {
                WireFailure::new(FailureCode::UnknownNextPeer, hop.node_id.clone(), e.to_string())
                    .at_hop(i)
                    .on_channel(hop.short_channel_id)
            })?;

            let Some(next) = route.hops.get(i + 1) else {
                return self.receive(&node, i, hop, payment_hash).await;
            };

            let in_htlc_id = node.next_htlc_id.fetch_add(1, Ordering::SeqCst);
            let out_channel = self
                .channels
                .get(&next.short_channel_id)
                .filter(|c| c.peer_of(&node.id) == Some(&next.node_id))
                .map(|_| next.short_channel_id);
            match node.forwards.offer(
                hop.short_channel_id,
                in_htlc_id,
                out_channel,
                payment_hash,
                hop.amount_msat,
                next.amount_msat,
            ) {
                Ok(_) => forwards.push((node.clone(), hop.short_channel_id, in_htlc_id)),
                Err(e) => tracing::warn!(node = %node.id, error = %e, "could not record forward"),
            }

            self.hand_over(&node, Some(i), Some(hop), next, locked)?;
        }
        Err(WireFailure::new(
            FailureCode::PermanentChannelFailure,
            self.local.clone(),
            "route has no hops",
        ))
    }

    async fn receive(
        &self,
        node: &SimNode,
        index: usize,
        hop: &RouteHop,
        payment_hash: PaymentHash,
    ) -> DispatchOutcome {
        let fail = |code: FailureCode, message: &str| {
            WireFailure::new(code, node.id.clone(), message)
                .at_hop(index)
                .on_channel(hop.short_channel_id)
        };

        if node.hold_htlcs.load(Ordering::SeqCst) {
            let (tx, rx) = oneshot::channel();
            self.held.insert(payment_hash, tx);
            tracing::debug!(node = %node.id, %payment_hash, "holding htlc at payee");
            if rx.await.is_err() {
                return Err(fail(FailureCode::TemporaryChannelFailure, "held htlc abandoned"));
            }
        }

        node.invoices
            .accept_htlc(&payment_hash, hop.amount_msat, hop.delay, Utc::now())
            .map_err(|code| fail(code, "payee rejected htlc"))
    }
}

#[async_trait]
impl HtlcDispatcher for SimulatedNetwork {
    async fn dispatch(&self, route: &Route, payment_hash: PaymentHash) -> DispatchOutcome {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        self.publish(payment_hash, HtlcResolution::InFlight);

        let mut forwards = Vec::new();
        let mut locked = Vec::new();
        let outcome = self
            .relay(route, payment_hash, &mut forwards, &mut locked)
            .await;

        for lock in &locked {
            let Some(mut channel) = self.channels.get_mut(&lock.scid) else {
                continue;
            };
            // Fulfilled HTLCs land on the far side, failed ones return to the sender.
            let side = match &outcome {
                Ok(_) => channel.peer_of(&lock.from).cloned(),
                Err(_) => Some(lock.from.clone()),
            };
            if let Some(side) = side {
                if let Some(balance) = channel.balance_mut(&side) {
                    *balance += lock.amount_msat;
                }
            }
        }

        let (state, failcode) = match &outcome {
            Ok(_) => (ForwardState::Settled, None),
            Err(failure) => (ForwardState::Failed, Some(failure.code)),
        };
        for (node, in_channel, in_htlc_id) in &forwards {
            if let Err(e) = node.forwards.resolve(*in_channel, *in_htlc_id, state, failcode) {
                tracing::warn!(node = %node.id, error = %e, "could not resolve forward");
            }
        }

        match &outcome {
            Ok(preimage) => {
                tracing::info!(%payment_hash, hops = route.len(), "simulated htlc fulfilled");
                self.publish(payment_hash, HtlcResolution::Fulfilled(*preimage));
            }
            Err(failure) => {
                tracing::info!(%payment_hash, error = %failure, "simulated htlc failed");
                self.publish(payment_hash, HtlcResolution::Failed(failure.clone()));
            }
        }
        outcome
    }

    async fn outstanding(&self, payment_hash: &PaymentHash) -> HtlcResolution {
        self.resolutions
            .get(payment_hash)
            .map_or(HtlcResolution::Unknown, |tx| tx.borrow().clone())
    }

    async fn await_resolution(&self, payment_hash: &PaymentHash) -> Option<DispatchOutcome> {
        let mut rx = self.resolutions.get(payment_hash)?.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            match current {
                HtlcResolution::Fulfilled(preimage) => return Some(Ok(preimage)),
                HtlcResolution::Failed(failure) => return Some(Err(failure)),
                HtlcResolution::Unknown => return None,
                HtlcResolution::InFlight => {}
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    async fn local_channels(&self) -> Vec<LocalChannel> {
        self.channels_of(&self.local)
    }

    fn node_id(&self) -> &NodeId {
        &self.local
    }

    fn adapter_id(&self) -> &str {
        "simulated"
    }
}
