//! lnpay Routing: finding fee- and delay-bounded paths through the channel graph.
//!
//! This crate provides:
//! - [`ChannelGraph`]: the concurrent topology snapshot of directed channel edges.
//! - [`ChannelUpdate`]: policy/liveness updates, from gossip or embedded in relay errors.
//! - [`RouteSolver`]: backward Dijkstra from the payee with exclusions and route hints.
//! - [`Route`]: the hop-by-hop amounts and delays handed to the wire layer.
//! - [`RouteBudget`]: the caller's fee and delay limits.

pub mod budget;
pub mod error;
pub mod graph;
pub mod route;
pub mod scoring;
pub mod solver;
pub mod update;

pub use budget::{worst_channel, BudgetViolation, Constraint, RouteBudget};
pub use error::RoutingError;
pub use graph::{ChannelEdge, ChannelGraph, Topology};
pub use route::{Route, RouteHop};
pub use solver::{Exclusions, RouteRequest, RouteSolver, SolverConfig};
pub use update::{ChannelUpdate, UpdateOutcome};
