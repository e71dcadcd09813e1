//! Integration test: pay() end to end over a simulated network.
//!
//! Covers replay of completed payments, the amount rules, route hints for
//! destinations behind private channels, and concurrent calls for one invoice.

use lnpay_core::PayState;
use lnpay_integration_tests::{hint, invoice, line, node, payment_hash, scid, InvoiceOpts, TestNode};
use lnpay_node::{AttemptOutcome, PayRequest, SendPayFilter, SendPayStatus};

fn strategies(tn: &TestNode, bolt11: &str) -> Vec<String> {
    tn.service
        .payment_status(Some(bolt11))
        .last()
        .expect("pay call recorded")
        .attempts
        .iter()
        .map(|a| a.strategy.clone())
        .collect()
}

// =========================================================================
// Basic payments
// =========================================================================

#[tokio::test]
async fn test_pay_over_two_hops() {
    let tn = TestNode::start(line(1));
    let bolt11 = invoice(&tn.network, 3, "coffee", Some(4_999_999), InvoiceOpts::default());

    let paid = tn.service.pay(PayRequest::new(bolt11.clone())).await.unwrap();
    assert_eq!(paid.status, SendPayStatus::Complete);
    assert_eq!(paid.destination, node(3));
    // l2 charges 1000 + floor(4999999 * 10 / 1e6) = 1049.
    assert_eq!(paid.amount_sent_msat, 5_001_048);
    assert!(paid.payment_preimage.unwrap().matches(&paid.payment_hash));

    let status = tn.service.payment_status(Some(&bolt11));
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].state, PayState::Succeeded);
    assert_eq!(status[0].attempts.len(), 1);
    assert_eq!(status[0].attempts[0].strategy, "Initial attempt");
    assert!(matches!(
        status[0].attempts[0].outcome,
        AttemptOutcome::Success { .. }
    ));

    let record = tn
        .network
        .invoices(&node(3))
        .unwrap()
        .get_by_label("coffee")
        .unwrap();
    assert_eq!(record.received_msat, Some(4_999_999));
}

#[tokio::test]
async fn test_invoices_paid_once_in_order() {
    let tn = TestNode::start(line(1));
    let first = invoice(&tn.network, 3, "first", Some(10_000), InvoiceOpts::default());
    let second = invoice(&tn.network, 3, "second", Some(10_000), InvoiceOpts::default());

    let start = chrono::Utc::now();
    tn.service.pay(PayRequest::new(first)).await.unwrap();
    tn.service.pay(PayRequest::new(second)).await.unwrap();
    let end = chrono::Utc::now();

    let registry = tn.network.invoices(&node(3)).unwrap();
    let a = registry.get_by_label("first").unwrap();
    let b = registry.get_by_label("second").unwrap();
    assert!(a.pay_index.unwrap() < b.pay_index.unwrap());
    for record in [&a, &b] {
        assert_eq!(record.status, lnpay_htlc::InvoiceStatus::Paid);
        let paid_at = record.paid_at.unwrap();
        assert!(start <= paid_at && paid_at <= end);
    }
}

#[tokio::test]
async fn test_repeat_pay_replays_without_dispatch() {
    let tn = TestNode::start(line(1));
    let bolt11 = invoice(&tn.network, 3, "twice", Some(100_000), InvoiceOpts::default());

    let first = tn.service.pay(PayRequest::new(bolt11.clone())).await.unwrap();
    let second = tn.service.pay(PayRequest::new(bolt11.clone())).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(tn.network.dispatch_count(), 1);

    // The replay did not start a second pay call.
    assert_eq!(tn.service.payment_status(Some(&bolt11)).len(), 1);
}

#[tokio::test]
async fn test_concurrent_pay_dispatches_once() {
    let tn = TestNode::start(line(1));
    let bolt11 = invoice(&tn.network, 3, "race", Some(250_000), InvoiceOpts::default());

    let a = tokio::spawn({
        let service = tn.service.clone();
        let bolt11 = bolt11.clone();
        async move { service.pay(PayRequest::new(bolt11)).await }
    });
    let b = tokio::spawn({
        let service = tn.service.clone();
        let bolt11 = bolt11.clone();
        async move { service.pay(PayRequest::new(bolt11)).await }
    });
    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    assert_eq!(a.payment_preimage, b.payment_preimage);
    assert_eq!(tn.network.dispatch_count(), 1);
    let filter = SendPayFilter {
        payment_hash: Some(payment_hash(&bolt11)),
        ..Default::default()
    };
    assert_eq!(tn.service.list_payments(&filter).len(), 1);
}

#[tokio::test]
async fn test_any_amount_invoice() {
    let tn = TestNode::start(line(1));
    let bolt11 = invoice(&tn.network, 3, "tip", None, InvoiceOpts::default());

    let err = tn.service.pay(PayRequest::new(bolt11.clone())).await.unwrap_err();
    assert_eq!(err.code(), -32602);
    assert_eq!(err.to_string(), "msatoshi parameter required");

    let mut request = PayRequest::new(bolt11);
    request.amount_msat = Some(42_000);
    let paid = tn.service.pay(request).await.unwrap();
    assert_eq!(paid.msatoshi, 42_000);
}

#[tokio::test]
async fn test_amount_on_fixed_invoice_rejected() {
    let tn = TestNode::start(line(1));
    let bolt11 = invoice(&tn.network, 3, "fixed", Some(42_000), InvoiceOpts::default());

    let mut request = PayRequest::new(bolt11);
    request.amount_msat = Some(42_000);
    let err = tn.service.pay(request).await.unwrap_err();
    assert_eq!(err.code(), -32602);
    assert_eq!(err.to_string(), "msatoshi parameter unnecessary");
    assert_eq!(tn.network.dispatch_count(), 0);
}

#[tokio::test]
async fn test_bad_fee_limits_rejected_before_any_attempt() {
    let tn = TestNode::start(line(1));
    let bolt11 = invoice(&tn.network, 3, "limits", Some(42_000), InvoiceOpts::default());

    for maxfeepercent in [-1.0, 101.0, f64::NAN] {
        let mut request = PayRequest::new(bolt11.clone());
        request.maxfeepercent = Some(maxfeepercent);
        let err = tn.service.pay(request).await.unwrap_err();
        assert_eq!(err.code(), -32602);
    }
    let mut request = PayRequest::new(bolt11.clone());
    request.riskfactor = Some(-1.0);
    assert_eq!(tn.service.pay(request).await.unwrap_err().code(), -32602);

    assert!(tn.service.payment_status(None).is_empty());
    assert_eq!(tn.network.dispatch_count(), 0);

    let paid = tn.service.pay(PayRequest::new(bolt11)).await.unwrap();
    assert_eq!(paid.msatoshi, 42_000);
}

#[tokio::test]
async fn test_invoice_with_huge_expiry_pays() {
    let tn = TestNode::start(line(1));
    let opts = InvoiceOpts {
        expiry_secs: Some(u64::MAX),
        ..Default::default()
    };
    let bolt11 = invoice(&tn.network, 3, "forever", Some(1_000), opts);

    let paid = tn.service.pay(PayRequest::new(bolt11)).await.unwrap();
    assert_eq!(paid.status, SendPayStatus::Complete);
}

#[tokio::test]
async fn test_expired_invoice() {
    let tn = TestNode::start(line(1));
    let opts = InvoiceOpts {
        expiry_secs: Some(0),
        ..Default::default()
    };
    let bolt11 = invoice(&tn.network, 3, "stale", Some(1_000), opts);

    let err = tn.service.pay(PayRequest::new(bolt11)).await.unwrap_err();
    assert_eq!(err.code(), 207);
    assert_eq!(tn.network.dispatch_count(), 0);
    assert!(tn.service.payment_status(None).is_empty());
}

#[tokio::test]
async fn test_malformed_invoice() {
    let tn = TestNode::start(line(1));
    let err = tn.service.pay(PayRequest::new("lnpay1garbage")).await.unwrap_err();
    assert_eq!(err.code(), -32602);
}

// =========================================================================
// Route hints
// =========================================================================

#[tokio::test]
async fn test_route_hint_reaches_private_payee() {
    // l2 -- l3 exists but was never announced.
    let tn = TestNode::with_private(line(1), &[scid(102)]);
    let opts = InvoiceOpts {
        route_hints: vec![hint(2, 102)],
        ..Default::default()
    };
    let bolt11 = invoice(&tn.network, 3, "private", Some(100_000), opts);

    let paid = tn.service.pay(PayRequest::new(bolt11.clone())).await.unwrap();
    assert_eq!(paid.amount_sent_msat, 101_001);
    assert_eq!(
        strategies(&tn, &bolt11),
        vec!["Initial attempt", "Trying route hint"]
    );

    let status = tn.service.payment_status(Some(&bolt11));
    let first = &status[0].attempts[0];
    match &first.outcome {
        AttemptOutcome::Failure(f) => assert_eq!(f.code, 205),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(first.route.is_none());
    assert_eq!(status[0].attempts[1].routehint, Some(hint(2, 102)));
    assert_eq!(tn.network.dispatch_count(), 1);
}

#[tokio::test]
async fn test_bad_route_hint_moves_to_next() {
    let tn = TestNode::with_private(line(1), &[scid(102)]);
    let opts = InvoiceOpts {
        // 999x1x0 does not exist.
        route_hints: vec![hint(2, 999), hint(2, 102)],
        ..Default::default()
    };
    let bolt11 = invoice(&tn.network, 3, "two-hints", Some(100_000), opts);

    tn.service.pay(PayRequest::new(bolt11.clone())).await.unwrap();
    assert_eq!(
        strategies(&tn, &bolt11),
        vec!["Initial attempt", "Trying route hint", "Trying route hint"]
    );
    assert_eq!(tn.network.dispatch_count(), 2);
}

#[tokio::test]
async fn test_no_route_without_hint() {
    let tn = TestNode::with_private(line(1), &[scid(102)]);
    let bolt11 = invoice(&tn.network, 3, "unreachable", Some(100_000), InvoiceOpts::default());

    let err = tn.service.pay(PayRequest::new(bolt11.clone())).await.unwrap_err();
    assert_eq!(err.code(), 205);
    assert_eq!(tn.network.dispatch_count(), 0);
    assert_eq!(
        tn.service.payment_status(Some(&bolt11))[0].state,
        PayState::Exhausted
    );
}
