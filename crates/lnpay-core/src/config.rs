use serde::{Deserialize, Serialize};

/// Defaults and bounds for pay() calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayConfig {
    /// Attempts after which a pay() call gives up.
    pub max_attempts: usize,
    /// Fee cap as a percentage of the amount.
    pub maxfeepercent: f64,
    /// Fees at or below this many msat are always acceptable.
    pub exemptfee_msat: u64,
    /// Largest additional CLTV delay, in blocks, a route may add.
    pub maxdelay: u32,
    /// Annual interest rate (percent) used to price locked-up funds.
    pub riskfactor: f64,
    /// Longest route the solver will build.
    pub max_hops: usize,
}

impl Default for PayConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            maxfeepercent: 0.5,
            exemptfee_msat: 5000,
            maxdelay: 2016,
            riskfactor: 1.0,
            max_hops: 20,
        }
    }
}

/// Global forwarding policy applied to every channel without an override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    pub fee_base_msat: u64,
    pub fee_proportional_millionths: u64,
    pub cltv_delta: u32,
    /// Minimum final CLTV delta written into invoices this node issues.
    pub cltv_final: u32,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            fee_base_msat: 1000,
            fee_proportional_millionths: 10,
            cltv_delta: 6,
            cltv_final: 5,
        }
    }
}
