use lnpay_core::{NodeId, ShortChannelId};
use serde::{Deserialize, Serialize};

use crate::error::RoutingError;

/// One hop of a route: the channel to use, the node it reaches, what that node
/// must receive and the delay it must be given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHop {
    pub node_id: NodeId,
    pub short_channel_id: ShortChannelId,
    pub amount_msat: u64,
    pub delay: u32,
}

/// An ordered payer-to-payee path with amounts and delays already computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub hops: Vec<RouteHop>,
}

impl Route {
    pub fn new(hops: Vec<RouteHop>) -> Self {
        Self { hops }
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn destination(&self) -> Option<&NodeId> {
        self.hops.last().map(|h| &h.node_id)
    }

    pub fn first_hop(&self) -> Option<&RouteHop> {
        self.hops.first()
    }

    /// What leaves this node: the first hop's amount, fees included.
    pub fn amount_sent_msat(&self) -> u64 {
        self.hops.first().map_or(0, |h| h.amount_msat)
    }

    /// What the payee receives.
    pub fn amount_delivered_msat(&self) -> u64 {
        self.hops.last().map_or(0, |h| h.amount_msat)
    }

    /// Total fee paid to intermediate hops.
    pub fn fee_msat(&self) -> u64 {
        self.amount_sent_msat()
            .saturating_sub(self.amount_delivered_msat())
    }

    /// Delay the first hop must be given.
    pub fn total_delay(&self) -> u32 {
        self.hops.first().map_or(0, |h| h.delay)
    }

    pub fn channels(&self) -> Vec<ShortChannelId> {
        self.hops.iter().map(|h| h.short_channel_id).collect()
    }

    pub fn uses_channel(&self, scid: &ShortChannelId) -> bool {
        self.hops.iter().any(|h| h.short_channel_id == *scid)
    }

    /// Fee charged for forwarding onto each hop's channel. The payer charges
    /// nothing for its own first hop.
    pub fn fee_per_channel(&self) -> Vec<(ShortChannelId, u64)> {
        self.per_channel(|prev, hop| prev.amount_msat.saturating_sub(hop.amount_msat))
    }

    /// CLTV delta consumed by forwarding onto each hop's channel.
    pub fn delay_per_channel(&self) -> Vec<(ShortChannelId, u64)> {
        self.per_channel(|prev, hop| prev.delay.saturating_sub(hop.delay) as u64)
    }

    fn per_channel<F>(&self, charge: F) -> Vec<(ShortChannelId, u64)>
    where
        F: Fn(&RouteHop, &RouteHop) -> u64,
    {
        self.hops
            .iter()
            .enumerate()
            .map(|(i, hop)| {
                let value = if i == 0 {
                    0
                } else {
                    charge(&self.hops[i - 1], hop)
                };
                (hop.short_channel_id, value)
            })
            .collect()
    }

    /// Structural checks for routes supplied by a caller: at least one hop,
    /// amounts and delays never increase toward the payee, no channel used twice.
    pub fn validate(&self) -> Result<(), RoutingError> {
        if self.hops.is_empty() {
            return Err(RoutingError::InvalidRoute {
                reason: "route has no hops".into(),
            });
        }
        for (i, pair) in self.hops.windows(2).enumerate() {
            if pair[1].amount_msat > pair[0].amount_msat {
                return Err(RoutingError::InvalidRoute {
                    reason: format!("amount increases at hop {}", i + 1),
                });
            }
            if pair[1].delay > pair[0].delay {
                return Err(RoutingError::InvalidRoute {
                    reason: format!("delay increases at hop {}", i + 1),
                });
            }
        }
        let mut channels = self.channels();
        channels.sort();
        let before = channels.len();
        channels.dedup();
        if channels.len() != before {
            return Err(RoutingError::InvalidRoute {
                reason: "channel used more than once".into(),
            });
        }
        Ok(())
    }
}
