use chrono::{DateTime, Utc};
use lnpay_core::{NodeId, ShortChannelId};
use serde::{Deserialize, Serialize};

use crate::error::RoutingError;

/// Policy and liveness of one channel direction, as announced by `node_id`.
///
/// Arrives either through gossip or embedded in a relay error from the hop
/// that rejected an HTLC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelUpdate {
    pub short_channel_id: ShortChannelId,
    /// Node whose outgoing direction this update describes.
    pub node_id: NodeId,
    pub timestamp: DateTime<Utc>,
    pub fee_base_msat: u64,
    pub fee_proportional_millionths: u64,
    pub cltv_delta: u32,
    pub active: bool,
}

impl ChannelUpdate {
    pub fn validate(&self) -> Result<(), RoutingError> {
        if self.fee_proportional_millionths > 1_000_000 {
            return Err(RoutingError::InvalidUpdate {
                reason: format!(
                    "proportional fee {} exceeds 100%",
                    self.fee_proportional_millionths
                ),
            });
        }
        Ok(())
    }
}

/// What applying a [`ChannelUpdate`] changed in the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The update was older than what the snapshot already holds.
    Stale,
    Applied {
        /// Fee base, proportional fee or CLTV delta differ from before.
        policy_changed: bool,
        /// The direction is now disabled.
        disabled: bool,
    },
}

impl UpdateOutcome {
    /// Whether the next solve will see something different for this channel.
    pub fn changes_routing(&self) -> bool {
        match self {
            Self::Stale => false,
            Self::Applied {
                policy_changed,
                disabled,
            } => *policy_changed || *disabled,
        }
    }
}
