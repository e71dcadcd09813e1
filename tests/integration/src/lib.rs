//! Test harness: simulated networks with a payment service attached to one node.

use std::path::PathBuf;
use std::sync::Arc;

use lnpay_core::{FeeConfig, Invoice, NodeId, PayConfig, PaymentHash, RouteHint, RouteHintHop, ShortChannelId};
use lnpay_htlc::{FeeSchedule, HtlcDispatcher, NewInvoice, SimulatedNetwork};
use lnpay_node::{PaymentService, PaymentStore};
use lnpay_routing::{ChannelEdge, ChannelGraph, Route, RouteHop};

/// Channel balance used on both sides unless a test says otherwise.
pub const BALANCE_MSAT: u64 = 100_000_000;

/// Deterministic node id `n`.
pub fn node(n: u8) -> NodeId {
    let mut bytes = [n; 33];
    bytes[0] = 0x02;
    NodeId::from_bytes(bytes).expect("valid node id")
}

pub fn scid(block: u32) -> ShortChannelId {
    ShortChannelId::new(block, 1, 0)
}

pub fn temp_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("lnpay-{prefix}-{}", uuid::Uuid::now_v7()))
}

/// Build a simulated network seen from `local`: `nodes` are added and `channels`
/// opened with [`BALANCE_MSAT`] on each side.
pub fn network(local: u8, nodes: &[u8], channels: &[(u32, u8, u8)]) -> Arc<SimulatedNetwork> {
    let network = SimulatedNetwork::new(node(local), FeeSchedule::from(FeeConfig::default()));
    for n in nodes {
        network.add_node(node(*n));
    }
    for (block, a, b) in channels {
        network
            .open_channel(scid(*block), &node(*a), &node(*b), BALANCE_MSAT, BALANCE_MSAT)
            .expect("open channel");
    }
    Arc::new(network)
}

/// l1 -- 101x1x0 -- l2 -- 102x1x0 -- l3.
pub fn line(local: u8) -> Arc<SimulatedNetwork> {
    network(local, &[1, 2, 3], &[(101, 1, 2), (102, 2, 3)])
}

/// A payment service for the network's local node, with its own data directory.
pub struct TestNode {
    pub dir: PathBuf,
    pub network: Arc<SimulatedNetwork>,
    pub service: PaymentService,
}

impl TestNode {
    /// Route on the network's full gossip.
    pub fn start(network: Arc<SimulatedNetwork>) -> Self {
        let edges = network.gossip();
        Self::with_edges(network, edges)
    }

    /// Route on the network's gossip minus `private` channels.
    pub fn with_private(network: Arc<SimulatedNetwork>, private: &[ShortChannelId]) -> Self {
        let edges = network
            .gossip()
            .into_iter()
            .filter(|e| !private.contains(&e.short_channel_id))
            .collect();
        Self::with_edges(network, edges)
    }

    fn with_edges(network: Arc<SimulatedNetwork>, edges: Vec<ChannelEdge>) -> Self {
        let dir = temp_dir("node");
        let graph = Arc::new(ChannelGraph::from_edges(edges));
        let service = service(&dir, &network, graph);
        Self {
            dir,
            network,
            service,
        }
    }

    /// Overwrite the service's topology snapshot with the network's current gossip.
    pub fn sync_gossip(&self) {
        for edge in self.network.gossip() {
            self.service.graph().insert_edge(edge);
        }
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.dir).ok();
    }
}

/// Open the payment store in `dir` and build a service over it.
pub fn service(
    dir: &std::path::Path,
    network: &Arc<SimulatedNetwork>,
    graph: Arc<ChannelGraph>,
) -> PaymentService {
    let store = Arc::new(PaymentStore::open(dir).expect("open payment store"));
    let fees = network
        .fee_policy(network.node_id())
        .expect("local fee policy");
    PaymentService::new(PayConfig::default(), store, graph, network.clone(), fees)
        .expect("payment service")
}

/// Parameters for [`invoice`] beyond payee and amount.
#[derive(Default)]
pub struct InvoiceOpts {
    pub route_hints: Vec<RouteHint>,
    pub expiry_secs: Option<u64>,
}

/// Issue an invoice on `payee` and return its bolt11 string.
pub fn invoice(
    network: &SimulatedNetwork,
    payee: u8,
    label: &str,
    amount_msat: Option<u64>,
    opts: InvoiceOpts,
) -> String {
    network
        .invoices(&node(payee))
        .expect("payee exists")
        .create(NewInvoice {
            label: label.into(),
            amount_msat,
            description: format!("test invoice {label}"),
            expiry_secs: opts.expiry_secs,
            min_final_cltv_expiry: FeeConfig::default().cltv_final,
            route_hints: opts.route_hints,
            preimage: None,
        })
        .expect("create invoice")
        .bolt11
}

pub fn payment_hash(bolt11: &str) -> PaymentHash {
    Invoice::decode(bolt11).expect("decode invoice").payment_hash
}

/// A single-hop hint from `from` over `block` on default fees.
pub fn hint(from: u8, block: u32) -> RouteHint {
    let fees = FeeConfig::default();
    RouteHint::new(vec![RouteHintHop {
        node_id: node(from),
        short_channel_id: scid(block),
        fee_base_msat: fees.fee_base_msat,
        fee_proportional_millionths: fees.fee_proportional_millionths,
        cltv_expiry_delta: fees.cltv_delta,
    }])
}

/// l1 -> l2 -> l3 over 101x1x0 and 102x1x0 delivering `amount_msat` to l3, with
/// l2 charging the default fee.
pub fn route_to_l3(amount_msat: u64) -> Route {
    let fees = FeeSchedule::from(FeeConfig::default());
    let final_cltv = FeeConfig::default().cltv_final;
    Route::new(vec![
        RouteHop {
            node_id: node(2),
            short_channel_id: scid(101),
            amount_msat: amount_msat + fees.fee_msat(amount_msat),
            delay: final_cltv + fees.cltv_delta,
        },
        RouteHop {
            node_id: node(3),
            short_channel_id: scid(102),
            amount_msat,
            delay: final_cltv,
        },
    ])
}
