//! Path cost used to rank candidates: fees plus a premium for funds locked up by
//! CLTV delays, scaled by the caller's risk factor.

use std::cmp::Ordering;

/// Roughly 365.25 days of 10-minute blocks.
pub const BLOCKS_PER_YEAR: u64 = 52_596;

/// Premium for locking `amount_msat` for `delay` blocks at an annual rate of
/// `riskfactor` percent. Rounded up so any nonzero lock-up costs something.
pub fn risk_premium_msat(amount_msat: u64, delay: u32, riskfactor: f64) -> u64 {
    if riskfactor <= 0.0 || delay == 0 || amount_msat == 0 {
        return 0;
    }
    let premium = amount_msat as f64 * delay as f64 * riskfactor / BLOCKS_PER_YEAR as f64 / 100.0;
    premium.ceil() as u64
}

/// Accumulated cost of a partial path. Ordered by total cost, then hop count,
/// so equal-cost paths prefer the shorter one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PathCost {
    pub fee_msat: u64,
    pub risk_msat: u64,
    pub hops: usize,
}

impl PathCost {
    pub fn total(&self) -> u64 {
        self.fee_msat.saturating_add(self.risk_msat)
    }

    pub fn extend(&self, fee_msat: u64, risk_msat: u64) -> Self {
        Self {
            fee_msat: self.fee_msat.saturating_add(fee_msat),
            risk_msat: self.risk_msat.saturating_add(risk_msat),
            hops: self.hops + 1,
        }
    }
}

impl PartialOrd for PathCost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PathCost {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total()
            .cmp(&other.total())
            .then(self.fee_msat.cmp(&other.fee_msat))
            .then(self.hops.cmp(&other.hops))
    }
}
