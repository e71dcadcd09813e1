use std::collections::BTreeSet;
use std::fmt;

use lnpay_core::ShortChannelId;
use serde::{Deserialize, Serialize};

use crate::route::Route;

/// Which budget a route broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    Fee,
    Delay,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fee => write!(f, "expensive"),
            Self::Delay => write!(f, "delaying"),
        }
    }
}

/// A feasible route rejected by the caller's limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum BudgetViolation {
    #[error("Route wanted fee of {fee_msat}msat")]
    Fee { fee_msat: u64, limit_msat: u64 },

    #[error("Route wanted delay of {delay} blocks")]
    Delay { delay: u32, limit: u32 },
}

impl BudgetViolation {
    pub fn constraint(&self) -> Constraint {
        match self {
            Self::Fee { .. } => Constraint::Fee,
            Self::Delay { .. } => Constraint::Delay,
        }
    }
}

/// Caller limits on what a route may cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteBudget {
    /// Percent of the amount, e.g. `0.5` for half a percent.
    pub maxfeepercent: f64,
    /// Fees up to this value pass regardless of the percentage.
    pub exemptfee_msat: u64,
    /// Additional blocks of delay beyond the payee's final CLTV.
    pub maxdelay: u32,
}

impl RouteBudget {
    /// `max(exemptfee, amount * maxfeepercent / 100)`.
    pub fn fee_limit_msat(&self, amount_msat: u64) -> u64 {
        let pct = (amount_msat as f64 * self.maxfeepercent / 100.0).floor() as u64;
        pct.max(self.exemptfee_msat)
    }

    /// Reject `route` if its fee or added delay is over budget. Fees are checked first.
    pub fn check(&self, route: &Route, amount_msat: u64, final_cltv: u32) -> Result<(), BudgetViolation> {
        let fee_msat = route.fee_msat();
        if fee_msat > self.exemptfee_msat {
            let feepercent = if amount_msat == 0 {
                f64::INFINITY
            } else {
                fee_msat as f64 * 100.0 / amount_msat as f64
            };
            if feepercent > self.maxfeepercent {
                return Err(BudgetViolation::Fee {
                    fee_msat,
                    limit_msat: self.fee_limit_msat(amount_msat),
                });
            }
        }

        let delay = route.total_delay().saturating_sub(final_cltv);
        if delay > self.maxdelay {
            return Err(BudgetViolation::Delay {
                delay,
                limit: self.maxdelay,
            });
        }
        Ok(())
    }
}

/// The channel contributing most to the violated constraint, ignoring channels in
/// `skip` (route hint channels, already excluded ones). Ties go to the earliest hop;
/// a channel with zero contribution still qualifies when nothing else is left.
pub fn worst_channel(
    route: &Route,
    constraint: Constraint,
    skip: &BTreeSet<ShortChannelId>,
) -> Option<ShortChannelId> {
    let charges = match constraint {
        Constraint::Fee => route.fee_per_channel(),
        Constraint::Delay => route.delay_per_channel(),
    };
    let mut worst: Option<(ShortChannelId, u64)> = None;
    for (scid, value) in charges {
        if skip.contains(&scid) {
            continue;
        }
        if worst.map_or(true, |(_, v)| value > v) {
            worst = Some((scid, value));
        }
    }
    worst.map(|(scid, _)| scid)
}
