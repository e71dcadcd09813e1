//! Integration test: payment and forwarding state across a node restart.
//!
//! Payments left `pending` by a previous run are settled from what the HTLC
//! layer knows, without sending anything again.

use std::sync::Arc;

use lnpay_core::{PayConfig, PayState, PaymentHash, Preimage};
use lnpay_htlc::{ForwardFilter, ForwardState, HtlcDispatcher};
use lnpay_integration_tests::{
    invoice, line, node, payment_hash, route_to_l3, scid, service, temp_dir, InvoiceOpts,
};
use lnpay_node::{
    Attempt, AttemptOutcome, InboundHtlc, NewSendPay, PayRequest, PayStatusEntry, PaymentStore,
    SendPayFilter, SendPayStatus,
};
use lnpay_routing::{ChannelGraph, Route, RouteHop};

fn pending(store: &PaymentStore, payment_hash: PaymentHash, route: Route) -> u64 {
    store
        .insert_sendpay(NewSendPay {
            payment_hash,
            route,
            label: Some("before-restart".into()),
            bolt11: None,
        })
        .unwrap()
        .id
}

/// A pay() call caught mid-attempt: state `attempting`, one pending attempt and
/// its pending SendPay.
fn interrupted_pay(store: &PaymentStore, bolt11: &str, amount_msat: u64) -> u64 {
    let params = PayRequest::new(bolt11).params(&PayConfig::default()).unwrap();
    let id = store
        .begin_pay(PayStatusEntry::new(
            bolt11.to_string(),
            payment_hash(bolt11),
            node(3),
            amount_msat,
            None,
            params,
        ))
        .unwrap();
    store.set_pay_state(id, PayState::Attempting).unwrap();
    store
        .start_attempt(id, Attempt::start("Initial attempt", None, vec![]))
        .unwrap();
    pending(store, payment_hash(bolt11), route_to_l3(amount_msat));
    id
}

#[tokio::test]
async fn test_reconcile_after_restart() {
    let dir = temp_dir("restart");
    let network = line(1);

    // Never dispatched.
    let lost = Preimage([3; 32]).payment_hash();
    // Dispatched and fulfilled while the node was down.
    let done = payment_hash(&invoice(&network, 3, "done", Some(20_000), InvoiceOpts::default()));
    network.dispatch(&route_to_l3(20_000), done).await.unwrap();
    // Still held at the payee.
    let held = payment_hash(&invoice(&network, 3, "held", Some(30_000), InvoiceOpts::default()));
    network.set_hold_htlcs(&node(3), true).unwrap();
    let in_flight = tokio::spawn({
        let network = network.clone();
        async move { network.dispatch(&route_to_l3(30_000), held).await }
    });
    while !network.is_held(&held) {
        tokio::task::yield_now().await;
    }

    let (lost_id, done_id, held_id) = {
        let store = PaymentStore::open(&dir).unwrap();
        (
            pending(&store, lost, route_to_l3(10_000)),
            pending(&store, done, route_to_l3(20_000)),
            pending(&store, held, route_to_l3(30_000)),
        )
    };
    let dispatched = network.dispatch_count();

    let graph = Arc::new(ChannelGraph::from_edges(network.gossip()));
    let svc = service(&dir, &network, graph);
    assert_eq!(svc.get_info().await.num_pending_payments, 3);
    assert_eq!(svc.reconcile_pending().await.unwrap(), 3);

    let lost_record = svc.store().get_sendpay(lost_id).unwrap();
    assert_eq!(lost_record.status, SendPayStatus::Failed);
    assert_eq!(
        lost_record.failure.as_ref().map(|f| f.message.as_str()),
        Some("HTLC never left this node")
    );
    let done_record = svc.store().get_sendpay(done_id).unwrap();
    assert_eq!(done_record.status, SendPayStatus::Complete);
    assert!(done_record.payment_preimage.unwrap().matches(&done));
    assert_eq!(
        svc.store().get_sendpay(held_id).unwrap().status,
        SendPayStatus::Pending
    );

    assert!(network.release_held(&held));
    in_flight.await.unwrap().unwrap();
    let held_record = svc.await_outcome(held).await.unwrap();
    assert_eq!(held_record.id, held_id);
    assert_eq!(held_record.status, SendPayStatus::Complete);

    assert_eq!(network.dispatch_count(), dispatched);
    assert!(svc.store().pending_sendpays().is_empty());

    drop(svc);
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_reconcile_closes_interrupted_pay_calls() {
    let dir = temp_dir("restart");
    let network = line(1);
    let done = invoice(&network, 3, "done", Some(20_000), InvoiceOpts::default());
    network
        .dispatch(&route_to_l3(20_000), payment_hash(&done))
        .await
        .unwrap();
    let lost = invoice(&network, 3, "lost", Some(10_000), InvoiceOpts::default());

    let (done_id, lost_id) = {
        let store = PaymentStore::open(&dir).unwrap();
        (
            interrupted_pay(&store, &done, 20_000),
            interrupted_pay(&store, &lost, 10_000),
        )
    };

    let graph = Arc::new(ChannelGraph::from_edges(network.gossip()));
    let svc = service(&dir, &network, graph);
    assert_eq!(svc.reconcile_pending().await.unwrap(), 2);

    let done_entry = svc.store().get_pay(done_id).unwrap();
    assert_eq!(done_entry.state, PayState::Succeeded);
    assert!(done_entry.failure.is_none());
    assert!(matches!(
        done_entry.attempts[0].outcome,
        AttemptOutcome::Success { .. }
    ));
    assert!(done_entry.attempts[0].duration_ms.is_some());

    let lost_entry = svc.store().get_pay(lost_id).unwrap();
    assert_eq!(lost_entry.state, PayState::Interrupted);
    assert_eq!(lost_entry.failure.as_ref().map(|e| e.code()), Some(202));
    match &lost_entry.attempts[0].outcome {
        AttemptOutcome::Failure(failure) => {
            assert!(failure.message.contains("HTLC never left this node"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(svc.store().unfinished_pays().is_empty());

    // An interrupted call is not an exhausted one: paying again tries afresh.
    let dispatched = network.dispatch_count();
    let paid = svc.pay(PayRequest::new(lost.clone())).await.unwrap();
    assert_eq!(paid.status, SendPayStatus::Complete);
    assert_eq!(network.dispatch_count(), dispatched + 1);
    assert_eq!(svc.payment_status(Some(&lost)).len(), 2);

    drop(svc);
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_payments_survive_restart() {
    let dir = temp_dir("restart");
    let network = line(1);
    let bolt11 = invoice(&network, 3, "durable", Some(75_000), InvoiceOpts::default());

    let first = {
        let graph = Arc::new(ChannelGraph::from_edges(network.gossip()));
        let svc = service(&dir, &network, graph);
        svc.pay(PayRequest::new(bolt11.clone())).await.unwrap()
    };

    let graph = Arc::new(ChannelGraph::from_edges(network.gossip()));
    let svc = service(&dir, &network, graph);
    let replay = svc.pay(PayRequest::new(bolt11.clone())).await.unwrap();
    assert_eq!(replay, first);
    assert_eq!(network.dispatch_count(), 1);
    assert_eq!(svc.list_payments(&SendPayFilter::default()).len(), 1);
    assert_eq!(svc.payment_status(Some(&bolt11)).len(), 1);

    drop(svc);
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_forwards_survive_restart() {
    let dir = temp_dir("restart");
    let network = line(2);
    let bolt11 = invoice(&network, 3, "relayed", Some(40_000), InvoiceOpts::default());
    let htlc = InboundHtlc {
        in_channel: scid(101),
        in_htlc_id: 0,
        amount_msat: 41_000,
        cltv_expiry: 11,
        payment_hash: payment_hash(&bolt11),
        onward: Route::new(vec![RouteHop {
            node_id: node(3),
            short_channel_id: scid(102),
            amount_msat: 40_000,
            delay: 5,
        }]),
    };

    {
        let graph = Arc::new(ChannelGraph::from_edges(network.gossip()));
        let svc = service(&dir, &network, graph);
        let record = svc.forward(htlc.clone()).await.unwrap();
        assert_eq!(record.state, ForwardState::Settled);
    }

    let graph = Arc::new(ChannelGraph::from_edges(network.gossip()));
    let svc = service(&dir, &network, graph);
    let forwards = svc.list_forwards(&ForwardFilter::default());
    assert_eq!(forwards.len(), 1);
    assert_eq!(forwards[0].state, ForwardState::Settled);
    assert_eq!(svc.fees_collected_msat(), 1_000);

    // The restored ledger still rejects a replayed HTLC id, and new ids continue.
    assert!(svc.forward(htlc.clone()).await.is_err());
    let mut next = htlc;
    next.in_htlc_id = 1;
    next.payment_hash = Preimage([6; 32]).payment_hash();
    let record = svc.forward(next).await.unwrap();
    assert!(record.id > forwards[0].id);

    drop(svc);
    std::fs::remove_dir_all(&dir).ok();
}
