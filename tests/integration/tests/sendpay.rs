//! Integration test: sendpay / waitsendpay against the payee's amount checks.

use lnpay_core::PaymentHash;
use lnpay_integration_tests::{invoice, line, node, payment_hash, route_to_l3, scid, InvoiceOpts, TestNode};
use lnpay_node::{SendPayFilter, SendPayStatus};
use lnpay_routing::{Route, RouteHop};

async fn send_and_wait(tn: &TestNode, route: Route, hash: PaymentHash) -> Result<u64, i32> {
    tn.service
        .send(route, hash, None, None)
        .await
        .map_err(|e| e.code())?;
    tn.service
        .await_outcome(hash)
        .await
        .map(|r| r.msatoshi)
        .map_err(|e| e.code())
}

#[tokio::test]
async fn test_overpay_up_to_double() {
    let tn = TestNode::start(line(1));
    let bolt11 = invoice(&tn.network, 3, "double", Some(100_000), InvoiceOpts::default());
    let hash = payment_hash(&bolt11);

    assert_eq!(send_and_wait(&tn, route_to_l3(200_000), hash).await, Ok(200_000));
    let received = tn
        .network
        .invoices(&node(3))
        .unwrap()
        .get(&hash)
        .unwrap()
        .received_msat;
    assert_eq!(received, Some(200_000));
}

#[tokio::test]
async fn test_overpay_beyond_double_is_rejected() {
    let tn = TestNode::start(line(1));
    let bolt11 = invoice(&tn.network, 3, "greedy", Some(100_000), InvoiceOpts::default());
    let hash = payment_hash(&bolt11);

    assert_eq!(send_and_wait(&tn, route_to_l3(200_001), hash).await, Err(203));
    let err = tn.service.await_outcome(hash).await.unwrap_err();
    assert!(err
        .to_string()
        .contains("WIRE_INCORRECT_OR_UNKNOWN_PAYMENT_DETAILS"));
}

#[tokio::test]
async fn test_underpay_is_rejected() {
    let tn = TestNode::start(line(1));
    let bolt11 = invoice(&tn.network, 3, "short", Some(100_000), InvoiceOpts::default());
    let hash = payment_hash(&bolt11);

    assert_eq!(send_and_wait(&tn, route_to_l3(99_999), hash).await, Err(203));
    let err = tn.service.await_outcome(hash).await.unwrap_err();
    assert!(err.to_string().contains("WIRE_AMOUNT_BELOW_MINIMUM"));

    // A failed attempt does not block a correct one for the same hash.
    assert_eq!(send_and_wait(&tn, route_to_l3(100_000), hash).await, Ok(100_000));
    let filter = SendPayFilter {
        payment_hash: Some(hash),
        ..Default::default()
    };
    let records = tn.service.list_payments(&filter);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].status, SendPayStatus::Failed);
    assert_eq!(records[1].status, SendPayStatus::Complete);
}

#[tokio::test]
async fn test_zero_amount_is_below_minimum() {
    let tn = TestNode::start(line(1));
    let bolt11 = invoice(&tn.network, 2, "zero", None, InvoiceOpts::default());
    let hash = payment_hash(&bolt11);
    let route = Route::new(vec![RouteHop {
        node_id: node(2),
        short_channel_id: scid(101),
        amount_msat: 0,
        delay: 5,
    }]);

    assert_eq!(send_and_wait(&tn, route, hash).await, Err(203));
    let err = tn.service.await_outcome(hash).await.unwrap_err();
    assert!(err.to_string().contains("WIRE_AMOUNT_BELOW_MINIMUM"));
}

#[tokio::test]
async fn test_smaller_resend_after_success_rejected() {
    let tn = TestNode::start(line(1));
    let bolt11 = invoice(&tn.network, 3, "once", Some(100_000), InvoiceOpts::default());
    let hash = payment_hash(&bolt11);

    assert_eq!(send_and_wait(&tn, route_to_l3(150_000), hash).await, Ok(150_000));

    // Equal or smaller amounts replay; larger ones are refused.
    let replay = tn.service.send(route_to_l3(100_000), hash, None, None).await.unwrap();
    assert_eq!(replay.status, SendPayStatus::Complete);
    let err = tn
        .service
        .send(route_to_l3(150_001), hash, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), -32602);
    assert_eq!(err.to_string(), "Already succeeded with amount 150000msat");
    assert_eq!(tn.network.dispatch_count(), 1);
}

#[tokio::test]
async fn test_send_while_pending_is_in_progress() {
    let tn = TestNode::start(line(1));
    let bolt11 = invoice(&tn.network, 3, "held", Some(100_000), InvoiceOpts::default());
    let hash = payment_hash(&bolt11);
    tn.network.set_hold_htlcs(&node(3), true).unwrap();

    let pending = tn.service.send(route_to_l3(100_000), hash, None, None).await.unwrap();
    assert_eq!(pending.status, SendPayStatus::Pending);
    let err = tn
        .service
        .send(route_to_l3(100_000), hash, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), 200);

    while !tn.network.is_held(&hash) {
        tokio::task::yield_now().await;
    }
    assert!(tn.network.release_held(&hash));
    let done = tn.service.await_outcome(hash).await.unwrap();
    assert_eq!(done.id, pending.id);
    assert_eq!(done.status, SendPayStatus::Complete);
}

#[tokio::test]
async fn test_invalid_route_rejected() {
    let tn = TestNode::start(line(1));
    let err = tn
        .service
        .send(Route::new(Vec::new()), PaymentHash([1; 32]), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), -32602);
    assert_eq!(tn.network.dispatch_count(), 0);
    assert!(tn.service.list_payments(&SendPayFilter::default()).is_empty());
}
