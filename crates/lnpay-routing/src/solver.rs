use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::fmt;

use lnpay_core::{NodeId, RouteHint, ShortChannelId};

use crate::error::RoutingError;
use crate::graph::{ChannelEdge, Topology};
use crate::route::{Route, RouteHop};
use crate::scoring::{risk_premium_msat, PathCost};

/// Solver limits.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Longest route the solver will build, route hint hops included.
    pub max_hops: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self { max_hops: 20 }
    }
}

/// Channels and nodes a single pay() call has ruled out. Owned by the caller and
/// passed into every solve; the graph itself is never touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusions {
    pub channels: BTreeSet<ShortChannelId>,
    pub nodes: BTreeSet<NodeId>,
}

impl Exclusions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the channel was already excluded.
    pub fn exclude_channel(&mut self, scid: ShortChannelId) -> bool {
        self.channels.insert(scid)
    }

    pub fn exclude_node(&mut self, node: NodeId) -> bool {
        self.nodes.insert(node)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.nodes.is_empty()
    }

    fn prunes(&self, edge: &ChannelEdge) -> bool {
        self.channels.contains(&edge.short_channel_id)
            || self.nodes.contains(&edge.from)
            || self.nodes.contains(&edge.to)
    }
}

impl fmt::Display for Exclusions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self
            .channels
            .iter()
            .map(|c| c.to_string())
            .chain(self.nodes.iter().map(|n| n.to_string()))
            .collect();
        write!(f, "[{}]", items.join(", "))
    }
}

/// Everything one solve needs.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub source: NodeId,
    pub destination: NodeId,
    pub amount_msat: u64,
    /// Minimum final CLTV delta required by the payee.
    pub final_cltv: u32,
    pub riskfactor: f64,
    pub exclusions: Exclusions,
    /// Private last-mile path to append after reaching its entry node.
    pub route_hint: Option<RouteHint>,
}

/// Priority-queue entry for the backward search. `node` is where the partial path
/// currently starts; `hops` lead from there to the destination.
#[derive(Debug, Clone)]
struct SearchNode {
    node: NodeId,
    cost: PathCost,
    /// Amount `node` must receive.
    amount_msat: u64,
    /// Delay `node` must be given.
    delay: u32,
    hops: Vec<RouteHop>,
}

impl SearchNode {
    fn channel_key(&self) -> Vec<ShortChannelId> {
        self.hops.iter().map(|h| h.short_channel_id).collect()
    }
}

impl PartialEq for SearchNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SearchNode {}

impl PartialOrd for SearchNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse so the cheapest pops first. Channel ids
        // break remaining ties so the result never depends on iteration order.
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| other.channel_key().cmp(&self.channel_key()))
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// One-shot constrained shortest-path computation over a topology snapshot.
///
/// The search runs backward from the destination so each relaxation knows the
/// exact amount the downstream node needs, which is what fees are charged on.
pub struct RouteSolver {
    config: SolverConfig,
}

impl RouteSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(SolverConfig::default())
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Find the cheapest route for `request`, or `RouteNotFound`.
    ///
    /// With a route hint the public search targets the hint's entry node for the
    /// amount and delay the hint requires, and the hint hops are appended as given.
    /// Hint channels are never pruned by the exclusion set.
    pub fn solve<T>(&self, topology: &T, request: &RouteRequest) -> Result<Route, RoutingError>
    where
        T: Topology + ?Sized,
    {
        let (target, amount_msat, delay, tail) = match &request.route_hint {
            Some(hint) => self.splice_hint(request, hint)?,
            None => (
                request.destination.clone(),
                request.amount_msat,
                request.final_cltv,
                Vec::new(),
            ),
        };

        let mut hops = if target == request.source {
            Vec::new()
        } else {
            let budget = self.config.max_hops.saturating_sub(tail.len());
            self.search(topology, request, &target, amount_msat, delay, budget)?
        };
        hops.extend(tail);

        if hops.is_empty() || hops.len() > self.config.max_hops {
            return Err(RoutingError::RouteNotFound {
                from: request.source.clone(),
                to: request.destination.clone(),
            });
        }

        let route = Route::new(hops);
        tracing::debug!(
            destination = %request.destination,
            hops = route.len(),
            amount_sent_msat = route.amount_sent_msat(),
            delay = route.total_delay(),
            excluded = %request.exclusions,
            "route found"
        );
        Ok(route)
    }

    /// Walk the hint backward from the destination. Returns the entry node, the
    /// amount and delay it must receive, and the hint's route hops.
    fn splice_hint(
        &self,
        request: &RouteRequest,
        hint: &RouteHint,
    ) -> Result<(NodeId, u64, u32, Vec<RouteHop>), RoutingError> {
        if hint.hops.is_empty() {
            return Err(RoutingError::InvalidHint {
                reason: "route hint has no hops".into(),
            });
        }

        let mut amount = request.amount_msat;
        let mut delay = request.final_cltv;
        let mut next = request.destination.clone();
        let mut tail = Vec::with_capacity(hint.hops.len());

        for hint_hop in hint.hops.iter().rev() {
            tail.push(RouteHop {
                node_id: next.clone(),
                short_channel_id: hint_hop.short_channel_id,
                amount_msat: amount,
                delay,
            });
            if hint_hop.node_id == request.source {
                // Our own channel: no fee, no delta, and nothing further upstream.
                next = hint_hop.node_id.clone();
                break;
            }
            let fee = hint_hop
                .fee_msat(amount)
                .ok_or(RoutingError::AmountOverflow)?;
            amount = amount.checked_add(fee).ok_or(RoutingError::AmountOverflow)?;
            delay = delay
                .checked_add(hint_hop.cltv_expiry_delta)
                .ok_or(RoutingError::AmountOverflow)?;
            next = hint_hop.node_id.clone();
        }
        tail.reverse();

        if next == request.source {
            return Ok((next, request.amount_msat, request.final_cltv, tail));
        }
        Ok((next, amount, delay, tail))
    }

    fn search<T>(
        &self,
        topology: &T,
        request: &RouteRequest,
        target: &NodeId,
        amount_msat: u64,
        final_delay: u32,
        max_hops: usize,
    ) -> Result<Vec<RouteHop>, RoutingError>
    where
        T: Topology + ?Sized,
    {
        let not_found = || RoutingError::RouteNotFound {
            from: request.source.clone(),
            to: request.destination.clone(),
        };

        // Incoming edges per node, since the search walks toward the payer.
        let mut incoming: HashMap<NodeId, Vec<ChannelEdge>> = HashMap::new();
        for edge in topology.edges(None) {
            if !edge.active || request.exclusions.prunes(&edge) {
                continue;
            }
            incoming.entry(edge.to.clone()).or_default().push(edge);
        }

        let mut settled: HashSet<NodeId> = HashSet::new();
        let mut best: HashMap<NodeId, PathCost> = HashMap::new();
        let mut heap = BinaryHeap::new();

        heap.push(SearchNode {
            node: target.clone(),
            cost: PathCost::default(),
            amount_msat,
            delay: final_delay,
            hops: Vec::new(),
        });

        while let Some(current) = heap.pop() {
            if current.node == request.source {
                let mut hops = current.hops;
                hops.reverse();
                return Ok(hops);
            }
            if !settled.insert(current.node.clone()) {
                continue;
            }
            if current.hops.len() >= max_hops {
                continue;
            }

            let Some(edges) = incoming.get(&current.node) else {
                continue;
            };
            for edge in edges {
                if settled.contains(&edge.from) {
                    continue;
                }

                let hop = RouteHop {
                    node_id: current.node.clone(),
                    short_channel_id: edge.short_channel_id,
                    amount_msat: current.amount_msat,
                    delay: current.delay,
                };

                // The payer does not charge itself for its own channel.
                let (amount, delay, cost) = if edge.from == request.source {
                    (
                        current.amount_msat,
                        current.delay,
                        current.cost.extend(0, 0),
                    )
                } else {
                    let fee = edge
                        .fee_msat(current.amount_msat)
                        .ok_or(RoutingError::AmountOverflow)?;
                    let amount = current
                        .amount_msat
                        .checked_add(fee)
                        .ok_or(RoutingError::AmountOverflow)?;
                    let delay = current
                        .delay
                        .checked_add(edge.cltv_delta)
                        .ok_or(RoutingError::AmountOverflow)?;
                    let risk = risk_premium_msat(
                        current.amount_msat,
                        edge.cltv_delta,
                        request.riskfactor,
                    );
                    (amount, delay, current.cost.extend(fee, risk))
                };

                if best.get(&edge.from).is_some_and(|b| *b < cost) {
                    continue;
                }
                best.insert(edge.from.clone(), cost);

                let mut hops = current.hops.clone();
                hops.push(hop);
                heap.push(SearchNode {
                    node: edge.from.clone(),
                    cost,
                    amount_msat: amount,
                    delay,
                    hops,
                });
            }
        }

        Err(not_found())
    }
}
