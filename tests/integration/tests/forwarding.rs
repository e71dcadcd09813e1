//! Integration test: relaying HTLCs for other payers, and fee changes seen by a
//! payer routing on stale gossip.

use lnpay_core::{PaymentHash, Preimage};
use lnpay_htlc::{FailureCode, FeeTarget, ForwardFilter, ForwardState};
use lnpay_integration_tests::{invoice, line, node, payment_hash, scid, InvoiceOpts, TestNode};
use lnpay_node::{InboundHtlc, PayRequest};
use lnpay_routing::{Route, RouteHop};

/// An HTLC arriving at l2 over 101x1x0 to be sent on to l3 over 102x1x0.
fn inbound(in_htlc_id: u64, payment_hash: PaymentHash, out_msat: u64, in_msat: u64) -> InboundHtlc {
    InboundHtlc {
        in_channel: scid(101),
        in_htlc_id,
        amount_msat: in_msat,
        cltv_expiry: 11,
        payment_hash,
        onward: Route::new(vec![RouteHop {
            node_id: node(3),
            short_channel_id: scid(102),
            amount_msat: out_msat,
            delay: 5,
        }]),
    }
}

// =========================================================================
// Forwarding ledger
// =========================================================================

#[tokio::test]
async fn test_forward_settles_and_collects_fee() {
    let tn = TestNode::start(line(2));
    let bolt11 = invoice(&tn.network, 3, "relay", Some(4_999_999), InvoiceOpts::default());

    let record = tn
        .service
        .forward(inbound(0, payment_hash(&bolt11), 4_999_999, 5_001_048))
        .await
        .unwrap();
    assert_eq!(record.state, ForwardState::Settled);
    assert_eq!(record.out_channel, Some(scid(102)));
    assert_eq!(record.fee_msat(), 1_049);
    assert!(record.resolved_time.is_some());
    assert_eq!(tn.service.fees_collected_msat(), 1_049);

    let stats = tn.service.forward_stats(&scid(102));
    assert_eq!(stats.out_payments_fulfilled, 1);
    assert_eq!(stats.out_msatoshi_fulfilled, 4_999_999);
}

#[tokio::test]
async fn test_forward_unknown_hash_fails() {
    let tn = TestNode::start(line(2));
    let hash = Preimage([7; 32]).payment_hash();

    let record = tn
        .service
        .forward(inbound(0, hash, 10_000, 11_000))
        .await
        .unwrap();
    assert_eq!(record.state, ForwardState::Failed);
    assert_eq!(
        record.failcode,
        Some(FailureCode::IncorrectOrUnknownPaymentDetails)
    );
    assert_eq!(tn.service.fees_collected_msat(), 0);
}

#[tokio::test]
async fn test_forward_checks() {
    let tn = TestNode::start(line(2));
    let hash = Preimage([8; 32]).payment_hash();

    // Unknown outgoing channel.
    let mut htlc = inbound(0, hash, 10_000, 11_010);
    htlc.onward.hops[0].short_channel_id = scid(777);
    let record = tn.service.forward(htlc).await.unwrap();
    assert_eq!(record.failcode, Some(FailureCode::UnknownNextPeer));

    // Not enough margin over the outgoing delay.
    let mut htlc = inbound(1, hash, 10_000, 11_010);
    htlc.cltv_expiry = 10;
    let record = tn.service.forward(htlc).await.unwrap();
    assert_eq!(record.failcode, Some(FailureCode::IncorrectCltvExpiry));

    // Empty onion.
    let mut htlc = inbound(2, hash, 10_000, 11_010);
    htlc.onward = Route::new(Vec::new());
    let record = tn.service.forward(htlc).await.unwrap();
    assert_eq!(record.state, ForwardState::Failed);
    assert_eq!(record.out_channel, None);

    // Outgoing channel closed.
    tn.network.close_channel(&scid(102)).unwrap();
    let record = tn.service.forward(inbound(3, hash, 10_000, 11_010)).await.unwrap();
    assert_eq!(record.state, ForwardState::LocalFailed);
    assert_eq!(record.failcode, Some(FailureCode::PermanentChannelFailure));

    assert_eq!(tn.network.dispatch_count(), 0);
    assert_eq!(tn.service.list_forwards(&ForwardFilter::default()).len(), 4);
}

#[tokio::test]
async fn test_duplicate_forward_rejected() {
    let tn = TestNode::start(line(2));
    let hash = Preimage([9; 32]).payment_hash();
    tn.service.forward(inbound(5, hash, 10_000, 11_000)).await.unwrap();
    let err = tn
        .service
        .forward(inbound(5, hash, 10_000, 11_000))
        .await
        .unwrap_err();
    assert_eq!(err.code(), -32602);
}

#[tokio::test]
async fn test_held_forward_stays_offered() {
    let tn = TestNode::start(line(2));
    let bolt11 = invoice(&tn.network, 3, "slow", Some(50_000), InvoiceOpts::default());
    let hash = payment_hash(&bolt11);
    tn.network.set_hold_htlcs(&node(3), true).unwrap();

    let task = tokio::spawn({
        let service = tn.service.clone();
        async move { service.forward(inbound(0, hash, 50_000, 51_000)).await }
    });
    while !tn.network.is_held(&hash) {
        tokio::task::yield_now().await;
    }

    let offered = ForwardFilter {
        state: Some(ForwardState::Offered),
        ..Default::default()
    };
    assert_eq!(tn.service.list_forwards(&offered).len(), 1);
    assert_eq!(tn.service.get_info().await.num_forwards, 1);

    assert!(tn.network.release_held(&hash));
    let record = task.await.unwrap().unwrap();
    assert_eq!(record.state, ForwardState::Settled);
    assert!(tn.service.list_forwards(&offered).is_empty());
}

#[tokio::test]
async fn test_force_resolve_timeout() {
    let tn = TestNode::start(line(2));
    let bolt11 = invoice(&tn.network, 3, "stuck", Some(50_000), InvoiceOpts::default());
    let hash = payment_hash(&bolt11);
    tn.network.set_hold_htlcs(&node(3), true).unwrap();

    let task = tokio::spawn({
        let service = tn.service.clone();
        async move { service.forward(inbound(0, hash, 50_000, 51_000)).await }
    });
    while !tn.network.is_held(&hash) {
        tokio::task::yield_now().await;
    }

    let record = tn.service.force_resolve_timeout(scid(101), 0).unwrap();
    assert_eq!(record.state, ForwardState::LocalFailed);

    // The late onward result cannot change a terminal record.
    tn.network.release_held(&hash);
    assert!(task.await.unwrap().is_err());
    let filter = ForwardFilter {
        in_channel: Some(scid(101)),
        ..Default::default()
    };
    assert_eq!(
        tn.service.list_forwards(&filter)[0].state,
        ForwardState::LocalFailed
    );
}

#[tokio::test]
async fn test_three_forwards_ledger_counts() {
    let tn = TestNode::start(line(2));
    let l3 = node(3);

    // Fulfilled downstream.
    let paid = invoice(&tn.network, 3, "ok", Some(100_000), InvoiceOpts::default());
    tn.service
        .forward(inbound(0, payment_hash(&paid), 100_000, 101_001))
        .await
        .unwrap();

    // Rejected by the payee: nobody issued this hash.
    tn.service
        .forward(inbound(1, Preimage([2; 32]).payment_hash(), 100_000, 101_001))
        .await
        .unwrap();

    // Left hanging by a payee that never answers.
    let stuck = invoice(&tn.network, 3, "hang", Some(100_000), InvoiceOpts::default());
    let stuck_hash = payment_hash(&stuck);
    tn.network.set_hold_htlcs(&l3, true).unwrap();
    let _pending = tokio::spawn({
        let service = tn.service.clone();
        async move { service.forward(inbound(2, stuck_hash, 100_000, 101_001)).await }
    });
    while !tn.network.is_held(&stuck_hash) {
        tokio::task::yield_now().await;
    }

    let count = |state| {
        tn.service
            .list_forwards(&ForwardFilter {
                state: Some(state),
                ..Default::default()
            })
            .len()
    };
    assert_eq!(count(ForwardState::Settled), 1);
    assert_eq!(count(ForwardState::Failed), 1);
    assert_eq!(count(ForwardState::Offered), 1);
    assert_eq!(count(ForwardState::LocalFailed), 0);
    assert_eq!(tn.service.fees_collected_msat(), 1_001);

    let stats = tn.service.forward_stats(&scid(101));
    assert_eq!(stats.in_payments_offered, 3);
    assert_eq!(stats.in_payments_fulfilled, 1);
    assert_eq!(stats.in_msatoshi_fulfilled, 101_001);
}

// =========================================================================
// setchannelfee
// =========================================================================

#[tokio::test]
async fn test_payer_learns_new_fee_from_relay_error() {
    let tn = TestNode::start(line(1));
    let l2 = node(2);

    // Raise l2's fee on 102x1x0 behind the payer's back.
    tn.network
        .set_channel_fee(&l2, &FeeTarget::Channel(scid(102)), Some(1337), Some(137))
        .unwrap();
    let bolt11 = invoice(&tn.network, 3, "raised", Some(4_999_999), InvoiceOpts::default());
    let paid = tn.service.pay(PayRequest::new(bolt11.clone())).await.unwrap();
    // 1337 + floor(4999999 * 137 / 1e6) = 2021.
    assert_eq!(paid.amount_sent_msat, 5_002_020);
    let strategies: Vec<String> = tn.service.payment_status(Some(&bolt11))[0]
        .attempts
        .iter()
        .map(|a| a.strategy.clone())
        .collect();
    assert_eq!(
        strategies,
        vec![
            "Initial attempt".to_string(),
            format!("Applied channel update for {}", scid(102)),
        ]
    );

    // Zero base fee, announced before paying this time.
    tn.network
        .set_channel_fee(&l2, &FeeTarget::Channel(scid(102)), Some(0), Some(10))
        .unwrap();
    tn.sync_gossip();
    let bolt11 = invoice(&tn.network, 3, "zero-base", Some(4_999_999), InvoiceOpts::default());
    let paid = tn.service.pay(PayRequest::new(bolt11)).await.unwrap();
    assert_eq!(paid.amount_sent_msat, 5_000_048);
    assert_eq!(tn.network.dispatch_count(), 3);

    // Back to the node defaults.
    tn.network
        .set_channel_fee(&l2, &FeeTarget::Channel(scid(102)), None, None)
        .unwrap();
    tn.sync_gossip();
    let bolt11 = invoice(&tn.network, 3, "default", Some(4_999_999), InvoiceOpts::default());
    let paid = tn.service.pay(PayRequest::new(bolt11)).await.unwrap();
    assert_eq!(paid.amount_sent_msat, 5_001_048);
}

#[tokio::test]
async fn test_set_channel_fee_targets() {
    let tn = TestNode::start(line(2));

    let change = tn.service.set_channel_fee("all", Some(10), Some(20)).await.unwrap();
    assert_eq!(change.channels.len(), 2);
    assert_eq!(change.updates.len(), 2);

    let change = tn
        .service
        .set_channel_fee(&node(3).to_string(), Some(5), None)
        .await
        .unwrap();
    assert_eq!(change.channels.len(), 1);
    assert_eq!(change.channels[0].short_channel_id, scid(102));

    let err = tn
        .service
        .set_channel_fee("not-a-channel", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), -32602);
}
