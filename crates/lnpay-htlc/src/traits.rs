use async_trait::async_trait;
use lnpay_core::{NodeId, PaymentHash};
use lnpay_routing::Route;

use crate::fees::LocalChannel;
use crate::types::{DispatchOutcome, HtlcResolution};

/// Wire-layer interface the payment core dispatches through.
///
/// Implementations own the per-channel HTLC state machines; the payment core only
/// hands over a route and waits for the first hop to resolve.
#[async_trait]
pub trait HtlcDispatcher: Send + Sync {
    /// Send an HTLC along `route` and suspend until it is fulfilled or failed.
    async fn dispatch(&self, route: &Route, payment_hash: PaymentHash) -> DispatchOutcome;

    /// Current state of the latest HTLC sent for `payment_hash`.
    async fn outstanding(&self, payment_hash: &PaymentHash) -> HtlcResolution;

    /// Wait for an in-flight HTLC to resolve. `None` if nothing was ever sent.
    async fn await_resolution(&self, payment_hash: &PaymentHash) -> Option<DispatchOutcome>;

    /// Channels of the local node with their state and spendable balance.
    async fn local_channels(&self) -> Vec<LocalChannel>;

    /// The node this dispatcher sends from.
    fn node_id(&self) -> &NodeId;

    /// Short identifier for logs (e.g. "simulated").
    fn adapter_id(&self) -> &str;
}
