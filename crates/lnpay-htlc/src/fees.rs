//! Forwarding fee policy of a node's own channels: one global default plus
//! per-channel overrides set through `setchannelfee`.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use dashmap::DashMap;
use lnpay_core::{CoreError, FeeConfig, NodeId, ShortChannelId};
use lnpay_routing::ChannelUpdate;
use serde::{Deserialize, Serialize};

use crate::error::HtlcError;

/// Fee and CLTV requirements for forwarding over one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub fee_base_msat: u64,
    pub fee_proportional_millionths: u64,
    pub cltv_delta: u32,
}

impl FeeSchedule {
    /// `base + floor(amount * ppm / 1_000_000)`.
    pub fn fee_msat(&self, amount_msat: u64) -> u64 {
        let proportional =
            (amount_msat as u128 * self.fee_proportional_millionths as u128) / 1_000_000;
        self.fee_base_msat
            .saturating_add(u64::try_from(proportional).unwrap_or(u64::MAX))
    }
}

impl From<FeeConfig> for FeeSchedule {
    fn from(config: FeeConfig) -> Self {
        Self {
            fee_base_msat: config.fee_base_msat,
            fee_proportional_millionths: config.fee_proportional_millionths,
            cltv_delta: config.cltv_delta,
        }
    }
}

/// Lifecycle of a local channel, as far as fee changes care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelState {
    ChanneldNormal,
    ChanneldShuttingDown,
    Onchain,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChanneldNormal => write!(f, "CHANNELD_NORMAL"),
            Self::ChanneldShuttingDown => write!(f, "CHANNELD_SHUTTING_DOWN"),
            Self::Onchain => write!(f, "ONCHAIN"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// A channel this node is party to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalChannel {
    pub short_channel_id: ShortChannelId,
    pub peer: NodeId,
    pub state: ChannelState,
    /// What this node can still send over the channel.
    pub spendable_msat: u64,
}

impl LocalChannel {
    pub fn is_normal(&self) -> bool {
        self.state == ChannelState::ChanneldNormal
    }
}

/// Which channels a `setchannelfee` call applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeeTarget {
    Channel(ShortChannelId),
    Peer(NodeId),
    All,
}

impl FromStr for FeeTarget {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            return Ok(Self::All);
        }
        if let Ok(scid) = s.parse::<ShortChannelId>() {
            return Ok(Self::Channel(scid));
        }
        NodeId::new(s)
            .map(Self::Peer)
            .map_err(|_| CoreError::InvalidChannelId(s.to_string()))
    }
}

/// One channel whose fees were set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFeeSetting {
    pub short_channel_id: ShortChannelId,
    pub peer_id: NodeId,
    pub fee_base_msat: u64,
    pub fee_proportional_millionths: u64,
}

/// Result of a `setchannelfee` call: what changed and the updates to gossip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeChange {
    pub channels: Vec<ChannelFeeSetting>,
    pub updates: Vec<ChannelUpdate>,
}

/// Global default plus per-channel overrides.
pub struct ChannelFeePolicy {
    defaults: FeeSchedule,
    overrides: DashMap<ShortChannelId, (u64, u64)>,
}

impl ChannelFeePolicy {
    pub fn new(defaults: FeeSchedule) -> Self {
        Self {
            defaults,
            overrides: DashMap::new(),
        }
    }

    pub fn defaults(&self) -> FeeSchedule {
        self.defaults
    }

    /// The schedule in force on `scid`.
    pub fn effective(&self, scid: &ShortChannelId) -> FeeSchedule {
        match self.overrides.get(scid) {
            Some(o) => FeeSchedule {
                fee_base_msat: o.0,
                fee_proportional_millionths: o.1,
                cltv_delta: self.defaults.cltv_delta,
            },
            None => self.defaults,
        }
    }

    pub fn has_override(&self, scid: &ShortChannelId) -> bool {
        self.overrides.contains_key(scid)
    }

    pub fn clear(&self, scid: &ShortChannelId) {
        self.overrides.remove(scid);
    }

    /// Set fees on the channels `target` selects. A missing value falls back to the
    /// global default, so omitting both clears the override.
    pub fn set_channel_fee(
        &self,
        local: &NodeId,
        channels: &[LocalChannel],
        target: &FeeTarget,
        base: Option<i64>,
        ppm: Option<i64>,
    ) -> Result<FeeChange, HtlcError> {
        let base = non_negative("base", base)?.unwrap_or(self.defaults.fee_base_msat);
        let ppm = non_negative("ppm", ppm)?.unwrap_or(self.defaults.fee_proportional_millionths);

        let selected: Vec<&LocalChannel> = match target {
            FeeTarget::Channel(scid) => {
                let channel = channels
                    .iter()
                    .find(|c| c.short_channel_id == *scid)
                    .ok_or(HtlcError::UnknownChannel(*scid))?;
                if !channel.is_normal() {
                    return Err(HtlcError::ChannelNotActive {
                        scid: *scid,
                        state: channel.state.to_string(),
                    });
                }
                vec![channel]
            }
            FeeTarget::Peer(peer) => {
                let found: Vec<&LocalChannel> = channels
                    .iter()
                    .filter(|c| c.peer == *peer && c.is_normal())
                    .collect();
                if found.is_empty() {
                    return Err(HtlcError::NoActiveChannel(peer.clone()));
                }
                found
            }
            FeeTarget::All => channels.iter().filter(|c| c.is_normal()).collect(),
        };

        let now = Utc::now();
        let mut change = FeeChange::default();
        for channel in selected {
            let scid = channel.short_channel_id;
            if base == self.defaults.fee_base_msat
                && ppm == self.defaults.fee_proportional_millionths
            {
                self.overrides.remove(&scid);
            } else {
                self.overrides.insert(scid, (base, ppm));
            }
            tracing::info!(channel = %scid, base, ppm, "channel fee set");

            change.channels.push(ChannelFeeSetting {
                short_channel_id: scid,
                peer_id: channel.peer.clone(),
                fee_base_msat: base,
                fee_proportional_millionths: ppm,
            });
            change.updates.push(ChannelUpdate {
                short_channel_id: scid,
                node_id: local.clone(),
                timestamp: now,
                fee_base_msat: base,
                fee_proportional_millionths: ppm,
                cltv_delta: self.defaults.cltv_delta,
                active: true,
            });
        }
        Ok(change)
    }

    /// Current update for `scid` as this node would gossip it.
    pub fn channel_update(&self, local: &NodeId, scid: ShortChannelId, active: bool) -> ChannelUpdate {
        let schedule = self.effective(&scid);
        ChannelUpdate {
            short_channel_id: scid,
            node_id: local.clone(),
            timestamp: Utc::now(),
            fee_base_msat: schedule.fee_base_msat,
            fee_proportional_millionths: schedule.fee_proportional_millionths,
            cltv_delta: schedule.cltv_delta,
            active,
        }
    }
}

fn non_negative(name: &str, value: Option<i64>) -> Result<Option<u64>, HtlcError> {
    match value {
        None => Ok(None),
        Some(v) => u64::try_from(v)
            .map(Some)
            .map_err(|_| HtlcError::InvalidFee(format!("{name} must be non-negative, got {v}"))),
    }
}
