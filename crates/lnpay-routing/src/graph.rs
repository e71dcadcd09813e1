use std::path::Path;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lnpay_core::{NodeId, ShortChannelId};
use serde::{Deserialize, Serialize};

use crate::error::RoutingError;
use crate::update::{ChannelUpdate, UpdateOutcome};

/// One direction of a channel: `from` forwards to `to` under this policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub short_channel_id: ShortChannelId,
    pub fee_base_msat: u64,
    pub fee_proportional_millionths: u64,
    pub cltv_delta: u32,
    pub active: bool,
    pub last_update: DateTime<Utc>,
}

impl ChannelEdge {
    /// Fee `from` charges for forwarding `amount_msat` over this edge:
    /// `base + floor(amount * ppm / 1_000_000)`.
    pub fn fee_msat(&self, amount_msat: u64) -> Option<u64> {
        let proportional =
            (amount_msat as u128 * self.fee_proportional_millionths as u128) / 1_000_000;
        let proportional = u64::try_from(proportional).ok()?;
        self.fee_base_msat.checked_add(proportional)
    }
}

/// Read access to the topology plus the single mutation the payment core
/// performs on it.
pub trait Topology: Send + Sync {
    /// All directed edges, or only those leaving `source`.
    fn edges(&self, source: Option<&NodeId>) -> Vec<ChannelEdge>;

    /// Apply a policy update for `channel_id`.
    fn apply_update(
        &self,
        channel_id: &ShortChannelId,
        update: &ChannelUpdate,
    ) -> Result<UpdateOutcome, RoutingError>;
}

type EdgeKey = (ShortChannelId, NodeId);

/// Concurrent topology snapshot backed by DashMap, keyed by
/// `(short_channel_id, from)` so both directions of a channel coexist.
pub struct ChannelGraph {
    edges: DashMap<EdgeKey, ChannelEdge>,
}

impl ChannelGraph {
    pub fn new() -> Self {
        Self {
            edges: DashMap::new(),
        }
    }

    pub fn from_edges(edges: impl IntoIterator<Item = ChannelEdge>) -> Self {
        let graph = Self::new();
        for edge in edges {
            graph.insert_edge(edge);
        }
        graph
    }

    /// Load a JSON array of edges.
    pub fn load(path: &Path) -> Result<Self, RoutingError> {
        let content = std::fs::read_to_string(path)?;
        let edges: Vec<ChannelEdge> = serde_json::from_str(&content)?;
        tracing::info!(path = %path.display(), edges = edges.len(), "loaded topology snapshot");
        Ok(Self::from_edges(edges))
    }

    /// Insert or overwrite one direction. Returns the previous edge, if any.
    pub fn insert_edge(&self, edge: ChannelEdge) -> Option<ChannelEdge> {
        let key = (edge.short_channel_id, edge.from.clone());
        self.edges.insert(key, edge)
    }

    pub fn get_edge(&self, scid: &ShortChannelId, from: &NodeId) -> Option<ChannelEdge> {
        self.edges.get(&(*scid, from.clone())).map(|e| e.value().clone())
    }

    /// Remove both directions of a channel. Returns how many edges were removed.
    pub fn remove_channel(&self, scid: &ShortChannelId) -> usize {
        let before = self.edges.len();
        self.edges.retain(|key, _| key.0 != *scid);
        before - self.edges.len()
    }

    /// Drop edges that have not been refreshed since `cutoff`.
    pub fn prune_stale(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.edges.len();
        self.edges.retain(|_, edge| edge.last_update >= cutoff);
        let pruned = before - self.edges.len();
        if pruned > 0 {
            tracing::info!(pruned, "pruned stale channel edges");
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Every node that appears as an endpoint, sorted.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .edges
            .iter()
            .flat_map(|e| [e.from.clone(), e.to.clone()])
            .collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }
}

impl Default for ChannelGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology for ChannelGraph {
    fn edges(&self, source: Option<&NodeId>) -> Vec<ChannelEdge> {
        let mut edges: Vec<ChannelEdge> = self
            .edges
            .iter()
            .filter(|e| source.map_or(true, |s| e.from == *s))
            .map(|e| e.value().clone())
            .collect();
        // DashMap iteration order is arbitrary; the solver needs a stable one.
        edges.sort_by(|a, b| {
            (a.short_channel_id, &a.from).cmp(&(b.short_channel_id, &b.from))
        });
        edges
    }

    fn apply_update(
        &self,
        channel_id: &ShortChannelId,
        update: &ChannelUpdate,
    ) -> Result<UpdateOutcome, RoutingError> {
        if update.short_channel_id != *channel_id {
            return Err(RoutingError::InvalidUpdate {
                reason: format!(
                    "update for {} applied to {}",
                    update.short_channel_id, channel_id
                ),
            });
        }
        update.validate()?;

        let key = (*channel_id, update.node_id.clone());
        if let Some(mut entry) = self.edges.get_mut(&key) {
            let edge = entry.value_mut();
            if update.timestamp < edge.last_update {
                tracing::debug!(channel = %channel_id, "ignoring stale channel update");
                return Ok(UpdateOutcome::Stale);
            }
            let policy_changed = edge.fee_base_msat != update.fee_base_msat
                || edge.fee_proportional_millionths != update.fee_proportional_millionths
                || edge.cltv_delta != update.cltv_delta;
            let disabled = edge.active && !update.active;

            edge.fee_base_msat = update.fee_base_msat;
            edge.fee_proportional_millionths = update.fee_proportional_millionths;
            edge.cltv_delta = update.cltv_delta;
            edge.active = update.active;
            edge.last_update = update.timestamp;

            tracing::debug!(
                channel = %channel_id,
                direction = %update.node_id,
                policy_changed,
                disabled,
                "applied channel update"
            );
            return Ok(UpdateOutcome::Applied {
                policy_changed,
                disabled,
            });
        }

        // First update for this direction: the peer comes from the opposite direction.
        let peer = self
            .edges
            .iter()
            .find(|e| e.short_channel_id == *channel_id && e.to == update.node_id)
            .map(|e| e.from.clone())
            .ok_or(RoutingError::UnknownChannel(*channel_id))?;

        self.edges.insert(
            key,
            ChannelEdge {
                from: update.node_id.clone(),
                to: peer,
                short_channel_id: *channel_id,
                fee_base_msat: update.fee_base_msat,
                fee_proportional_millionths: update.fee_proportional_millionths,
                cltv_delta: update.cltv_delta,
                active: update.active,
                last_update: update.timestamp,
            },
        );
        Ok(UpdateOutcome::Applied {
            policy_changed: true,
            disabled: !update.active,
        })
    }
}
