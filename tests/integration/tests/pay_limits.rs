//! Integration test: fee and delay budgets, and the attempt bound.
//!
//! A route over budget is never dispatched. The controller excludes the channel
//! contributing most to the violation, falls back to route hints, and reports
//! the last violation once nothing is left.

use lnpay_core::PayState;
use lnpay_integration_tests::{hint, invoice, line, network, node, scid, InvoiceOpts, TestNode};
use lnpay_node::{AttemptOutcome, PayRequest};

fn hinted_invoice(tn: &TestNode, label: &str) -> String {
    let opts = InvoiceOpts {
        route_hints: vec![hint(2, 102)],
        ..Default::default()
    };
    invoice(&tn.network, 3, label, Some(100_000), opts)
}

fn strategies(tn: &TestNode, bolt11: &str) -> Vec<String> {
    tn.service.payment_status(Some(bolt11))[0]
        .attempts
        .iter()
        .map(|a| a.strategy.clone())
        .collect()
}

#[tokio::test]
async fn test_fee_limit_exhausts_strategies() {
    let tn = TestNode::start(line(1));
    let bolt11 = hinted_invoice(&tn, "fee-limit");

    let mut request = PayRequest::new(bolt11.clone());
    request.maxfeepercent = Some(0.0001);
    request.exemptfee_msat = Some(0);
    let err = tn.service.pay(request).await.unwrap_err();

    assert_eq!(err.code(), 206);
    assert_eq!(err.to_string(), "Route wanted fee of 1001msat");
    assert_eq!(
        strategies(&tn, &bolt11),
        vec![
            "Initial attempt".to_string(),
            format!("Excluded expensive channel {}", scid(102)),
            "Trying route hint".to_string(),
            format!("Excluded expensive channel {}", scid(101)),
        ]
    );
    assert_eq!(tn.network.dispatch_count(), 0);

    let status = &tn.service.payment_status(Some(&bolt11))[0];
    assert_eq!(status.state, PayState::Exhausted);
    assert_eq!(status.failure.as_ref().map(|e| e.code()), Some(206));
    // The hint channel is never excluded, even though it carries the fee.
    assert_eq!(status.attempts[3].excluded_channels, vec![scid(102)]);
}

#[tokio::test]
async fn test_delay_limit() {
    let tn = TestNode::start(line(1));
    let bolt11 = hinted_invoice(&tn, "delay-limit");

    let mut request = PayRequest::new(bolt11.clone());
    request.maxdelay = Some(0);
    let err = tn.service.pay(request).await.unwrap_err();

    assert_eq!(err.code(), 206);
    assert_eq!(err.to_string(), "Route wanted delay of 6 blocks");
    assert_eq!(
        strategies(&tn, &bolt11)[1],
        format!("Excluded delaying channel {}", scid(102))
    );
    assert_eq!(tn.network.dispatch_count(), 0);
}

#[tokio::test]
async fn test_exempt_fee_allows_route() {
    let tn = TestNode::start(line(1));
    let bolt11 = hinted_invoice(&tn, "exempt");

    let mut request = PayRequest::new(bolt11);
    request.maxfeepercent = Some(0.0001);
    request.exemptfee_msat = Some(2_000);
    let paid = tn.service.pay(request).await.unwrap();
    assert_eq!(paid.amount_sent_msat, 101_001);
}

#[tokio::test]
async fn test_direct_channel_pays_no_fee() {
    let tn = TestNode::start(line(1));
    let bolt11 = invoice(&tn.network, 2, "neighbour", Some(100_000), InvoiceOpts::default());

    let mut request = PayRequest::new(bolt11);
    request.maxfeepercent = Some(0.0);
    request.exemptfee_msat = Some(0);
    request.maxdelay = Some(0);
    let paid = tn.service.pay(request).await.unwrap();
    assert_eq!(paid.amount_sent_msat, 100_000);
}

/// l1 reaches l3 over six parallel paths through m1..m6 (nodes 11..16), none
/// of which is online.
fn unreachable_peers() -> TestNode {
    let mids: Vec<u8> = (11..=16).collect();
    let mut nodes = vec![1, 3];
    nodes.extend(&mids);
    let channels: Vec<(u32, u8, u8)> = mids
        .iter()
        .flat_map(|m| {
            let m = *m;
            [(200 + m as u32, 1, m), (300 + m as u32, m, 3)]
        })
        .collect();
    let network = network(1, &nodes, &channels);
    for m in &mids {
        network.set_online(&node(*m), false).unwrap();
    }
    TestNode::start(network)
}

#[tokio::test]
async fn test_stops_after_max_attempts() {
    let tn = unreachable_peers();
    let bolt11 = invoice(&tn.network, 3, "offline", Some(10_000), InvoiceOpts::default());

    let err = tn.service.pay(PayRequest::new(bolt11.clone())).await.unwrap_err();
    assert_eq!(err.code(), 210);
    assert_eq!(err.to_string(), "Stopped retrying after 5 attempts");
    assert_eq!(tn.network.dispatch_count(), 5);

    let status = &tn.service.payment_status(Some(&bolt11))[0];
    assert_eq!(status.attempts.len(), 5);
    for attempt in &status.attempts {
        match &attempt.outcome {
            AttemptOutcome::Failure(f) => {
                assert_eq!(f.code, 202);
                assert!(f.message.contains("First peer not ready"));
                assert_eq!(f.erring_node, Some(node(1)));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
    assert_eq!(status.attempts[4].excluded_channels.len(), 4);
    assert!(status.attempts[1].strategy.starts_with("Excluded channel "));
}

#[tokio::test]
async fn test_identical_exhausted_pay_fails_fast() {
    let tn = unreachable_peers();
    let bolt11 = invoice(&tn.network, 3, "offline-again", Some(10_000), InvoiceOpts::default());

    let first = tn.service.pay(PayRequest::new(bolt11.clone())).await.unwrap_err();
    let dispatched = tn.network.dispatch_count();

    let second = tn.service.pay(PayRequest::new(bolt11.clone())).await.unwrap_err();
    assert_eq!(second, first);
    assert_eq!(tn.network.dispatch_count(), dispatched);
    assert_eq!(tn.service.payment_status(Some(&bolt11)).len(), 1);

    // Different limits make it a new call.
    let mut request = PayRequest::new(bolt11.clone());
    request.max_attempts = Some(2);
    let third = tn.service.pay(request).await.unwrap_err();
    assert_eq!(third.to_string(), "Stopped retrying after 2 attempts");
    assert_eq!(tn.network.dispatch_count(), dispatched + 2);
    assert_eq!(tn.service.payment_status(Some(&bolt11)).len(), 2);
}

#[tokio::test]
async fn test_ran_out_of_routes() {
    let tn = unreachable_peers();
    let bolt11 = invoice(&tn.network, 3, "few-paths", Some(10_000), InvoiceOpts::default());

    let mut request = PayRequest::new(bolt11);
    request.max_attempts = Some(10);
    let err = tn.service.pay(request).await.unwrap_err();
    assert_eq!(err.code(), 210);
    assert_eq!(err.to_string(), "Ran out of routes to try after 7 attempts");
    assert_eq!(tn.network.dispatch_count(), 6);
}
