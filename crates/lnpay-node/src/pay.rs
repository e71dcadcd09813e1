//! The retry controller behind `pay`.
//!
//! One [`RetryController`] lives for the duration of a single pay() call. It owns
//! the exclusion set and the queue of unused route hints; everything durable goes
//! through the payment store as the loop runs, so `paystatus` can watch it.

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use lnpay_core::{
    Invoice, NodeId, PayConfig, PayEvent, PayState, PayStateMachine, PaymentHash, Preimage,
    RouteHint,
};
use lnpay_htlc::WireFailure;
use lnpay_routing::{worst_channel, BudgetViolation, Exclusions, RouteBudget, RouteRequest};
use serde::{Deserialize, Serialize};

use crate::error::PayError;
use crate::service::PaymentService;
use crate::store::{Attempt, AttemptOutcome, PayParams, SendPayRecord, SendPayStatus};

/// Arguments of a pay() call. Unset limits fall back to the node's `[pay]` config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PayRequest {
    pub bolt11: String,
    /// Required for "any amount" invoices, rejected for fixed ones.
    pub amount_msat: Option<u64>,
    pub label: Option<String>,
    pub maxfeepercent: Option<f64>,
    pub exemptfee_msat: Option<u64>,
    pub maxdelay: Option<u32>,
    pub riskfactor: Option<f64>,
    pub max_attempts: Option<usize>,
}

impl PayRequest {
    pub fn new(bolt11: impl Into<String>) -> Self {
        Self {
            bolt11: bolt11.into(),
            ..Default::default()
        }
    }

    /// Resolve the limits for this call. `maxfeepercent` must lie in 0..=100 and
    /// `riskfactor` must not be negative.
    pub fn params(&self, config: &PayConfig) -> Result<PayParams, PayError> {
        let params = PayParams {
            maxfeepercent: self.maxfeepercent.unwrap_or(config.maxfeepercent),
            exemptfee_msat: self.exemptfee_msat.unwrap_or(config.exemptfee_msat),
            maxdelay: self.maxdelay.unwrap_or(config.maxdelay),
            riskfactor: self.riskfactor.unwrap_or(config.riskfactor),
            max_attempts: self.max_attempts.unwrap_or(config.max_attempts),
        };
        if !(0.0..=100.0).contains(&params.maxfeepercent) {
            return Err(PayError::invalid(format!(
                "maxfeepercent must be between 0 and 100, got {}",
                params.maxfeepercent
            )));
        }
        if params.riskfactor.is_nan() || params.riskfactor < 0.0 {
            return Err(PayError::invalid(format!(
                "riskfactor must not be negative, got {}",
                params.riskfactor
            )));
        }
        Ok(params)
    }
}

/// Result of a successful pay(), fresh or replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayResponse {
    pub payment_hash: PaymentHash,
    pub destination: NodeId,
    pub status: SendPayStatus,
    pub payment_preimage: Option<Preimage>,
    pub msatoshi: u64,
    pub amount_sent_msat: u64,
    pub created_at: DateTime<Utc>,
}

impl From<&SendPayRecord> for PayResponse {
    fn from(record: &SendPayRecord) -> Self {
        Self {
            payment_hash: record.payment_hash,
            destination: record.destination.clone(),
            status: record.status,
            payment_preimage: record.payment_preimage,
            msatoshi: record.msatoshi,
            amount_sent_msat: record.amount_sent_msat,
            created_at: record.created_at,
        }
    }
}

/// What to do after an attempt failed.
enum Next {
    Retry(String),
    Stop(PayError),
}

pub(crate) struct RetryController<'a> {
    service: &'a PaymentService,
    pay_id: u64,
    invoice: &'a Invoice,
    bolt11: &'a str,
    label: Option<String>,
    amount_msat: u64,
    params: PayParams,
    state: PayState,
    exclusions: Exclusions,
    unused_hints: VecDeque<RouteHint>,
    hint: Option<RouteHint>,
    /// Last budget violation, reported if the search runs dry.
    too_expensive: Option<BudgetViolation>,
    dispatched: bool,
    attempts: usize,
}

impl<'a> RetryController<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        service: &'a PaymentService,
        pay_id: u64,
        invoice: &'a Invoice,
        bolt11: &'a str,
        label: Option<String>,
        amount_msat: u64,
        params: PayParams,
    ) -> Self {
        Self {
            service,
            pay_id,
            invoice,
            bolt11,
            label,
            amount_msat,
            params,
            state: PayState::Initial,
            exclusions: Exclusions::new(),
            unused_hints: invoice.route_hints.iter().cloned().collect(),
            hint: None,
            too_expensive: None,
            dispatched: false,
            attempts: 0,
        }
    }

    fn budget(&self) -> RouteBudget {
        RouteBudget {
            maxfeepercent: self.params.maxfeepercent,
            exemptfee_msat: self.params.exemptfee_msat,
            maxdelay: self.params.maxdelay,
        }
    }

    fn advance(&mut self, event: PayEvent) -> Result<(), PayError> {
        self.state = PayStateMachine::transition(self.state, event)?;
        self.service.store().set_pay_state(self.pay_id, self.state)?;
        Ok(())
    }

    /// Run attempts until one is fulfilled or the call gives up.
    pub(crate) async fn run(mut self) -> Result<SendPayRecord, PayError> {
        let payment_hash = self.invoice.payment_hash;
        let final_cltv = self.invoice.min_final_cltv_expiry;
        let service = self.service;
        let store = service.store();
        let mut strategy = "Initial attempt".to_string();
        self.advance(PayEvent::Start)?;

        loop {
            if self.attempts >= self.params.max_attempts {
                let attempts = self.attempts;
                let message = format!("Stopped retrying after {} attempts", attempts);
                return self.give_up(PayError::StoppedRetrying {
                    attempts,
                    message,
                });
            }
            if self.attempts > 0 {
                self.advance(PayEvent::Retry)?;
            }
            self.attempts += 1;

            let index = store.start_attempt(
                self.pay_id,
                Attempt::start(
                    strategy.clone(),
                    self.hint.clone(),
                    self.exclusions.channels.iter().copied().collect(),
                ),
            )?;
            tracing::debug!(
                %payment_hash,
                attempt = self.attempts,
                strategy = %strategy,
                "pay attempt started"
            );

            let request = RouteRequest {
                source: service.node_id().clone(),
                destination: self.invoice.payee.clone(),
                amount_msat: self.amount_msat,
                final_cltv,
                riskfactor: self.params.riskfactor,
                exclusions: self.exclusions.clone(),
                route_hint: self.hint.clone(),
            };

            let route = match service.solve(&request) {
                Ok(route) => route,
                Err(e) => {
                    let err = PayError::from(e);
                    store.finish_attempt(self.pay_id, index, AttemptOutcome::Failure((&err).into()))?;
                    match self.no_route(err) {
                        Next::Retry(next) => {
                            strategy = next;
                            continue;
                        }
                        Next::Stop(err) => return self.give_up(err),
                    }
                }
            };
            store.set_attempt_route(self.pay_id, index, route.clone())?;

            if let Err(violation) = self.budget().check(&route, self.amount_msat, final_cltv) {
                let err = PayError::RouteTooExpensive(violation.clone());
                store.finish_attempt(self.pay_id, index, AttemptOutcome::Failure((&err).into()))?;
                let constraint = violation.constraint();
                self.too_expensive = Some(violation);

                let mut skip: BTreeSet<_> = self.exclusions.channels.clone();
                if let Some(hint) = &self.hint {
                    skip.extend(hint.channels());
                }
                match worst_channel(&route, constraint, &skip) {
                    Some(scid) => {
                        self.exclusions.exclude_channel(scid);
                        strategy = format!("Excluded {constraint} channel {scid}");
                        continue;
                    }
                    None => match self.no_route(err) {
                        Next::Retry(next) => {
                            strategy = next;
                            continue;
                        }
                        Next::Stop(err) => return self.give_up(err),
                    },
                }
            }

            let outcome = match service.send_unlocked(
                route,
                payment_hash,
                self.label.clone(),
                Some(self.bolt11.to_string()),
            ) {
                Ok(_) => {
                    self.dispatched = true;
                    service.await_outcome(payment_hash).await
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(record) => {
                    let preimage = record
                        .payment_preimage
                        .ok_or_else(|| PayError::Internal("complete payment without preimage".into()))?;
                    store.finish_attempt(
                        self.pay_id,
                        index,
                        AttemptOutcome::Success {
                            payment_preimage: preimage,
                        },
                    )?;
                    self.advance(PayEvent::Fulfilled)?;
                    store.finish_pay(self.pay_id, self.state, None)?;
                    tracing::info!(
                        %payment_hash,
                        attempts = self.attempts,
                        amount_sent_msat = record.amount_sent_msat,
                        "payment succeeded"
                    );
                    return Ok(record);
                }
                Err(err) => {
                    store.finish_attempt(self.pay_id, index, AttemptOutcome::Failure((&err).into()))?;
                    let next = match &err {
                        PayError::TryOtherRoute(failure) => self.after_relay_failure(failure),
                        _ => Next::Stop(err.clone()),
                    };
                    match next {
                        Next::Retry(next) => strategy = next,
                        Next::Stop(err) => return self.give_up(err),
                    }
                }
            }
        }
    }

    /// The solver found nothing, or nothing within budget: fall back to the next
    /// route hint, or stop.
    fn no_route(&mut self, err: PayError) -> Next {
        if let Some(next) = self.next_hint() {
            return next;
        }
        if let Some(violation) = self.too_expensive.take() {
            return Next::Stop(PayError::RouteTooExpensive(violation));
        }
        if self.dispatched {
            return self.out_of_routes();
        }
        Next::Stop(err)
    }

    fn next_hint(&mut self) -> Option<Next> {
        let hint = self.unused_hints.pop_front()?;
        self.hint = Some(hint);
        Some(Next::Retry("Trying route hint".to_string()))
    }

    fn out_of_routes(&self) -> Next {
        Next::Stop(PayError::StoppedRetrying {
            attempts: self.attempts,
            message: format!("Ran out of routes to try after {} attempts", self.attempts),
        })
    }

    /// Refine the next solve after a relay error from a hop that is not the payee.
    fn after_relay_failure(&mut self, failure: &WireFailure) -> Next {
        if let Some(update) = &failure.update {
            match self.service.apply_update(update) {
                Ok(outcome) if outcome.changes_routing() => {
                    return Next::Retry(format!(
                        "Applied channel update for {}",
                        update.short_channel_id
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        channel = %update.short_channel_id,
                        error = %e,
                        "could not apply channel update from relay error"
                    );
                }
            }
        }

        let Some(scid) = failure.erring_channel else {
            self.exclusions.exclude_node(failure.erring_node.clone());
            return Next::Retry(format!("Excluded node {}", failure.erring_node));
        };
        if self.hint.as_ref().is_some_and(|h| h.contains_channel(&scid)) {
            return self.next_hint().unwrap_or_else(|| self.out_of_routes());
        }
        self.exclusions.exclude_channel(scid);
        Next::Retry(format!("Excluded channel {scid}"))
    }

    fn give_up(mut self, err: PayError) -> Result<SendPayRecord, PayError> {
        self.advance(PayEvent::GiveUp)?;
        self.service
            .store()
            .finish_pay(self.pay_id, self.state, Some(err.clone()))?;
        tracing::warn!(
            payment_hash = %self.invoice.payment_hash,
            attempts = self.attempts,
            code = err.code(),
            error = %err,
            "payment failed"
        );
        Err(err)
    }
}
