use lnpay_core::{NodeId, ShortChannelId};

/// Errors that can occur within the routing layer.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("Could not find a route from {from} to {to}")]
    RouteNotFound { from: NodeId, to: NodeId },

    #[error("invalid route: {reason}")]
    InvalidRoute { reason: String },

    #[error("invalid route hint: {reason}")]
    InvalidHint { reason: String },

    #[error("unknown channel {0}")]
    UnknownChannel(ShortChannelId),

    #[error("invalid channel update: {reason}")]
    InvalidUpdate { reason: String },

    #[error("amount overflow while computing fees")]
    AmountOverflow,

    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot format error: {0}")]
    Json(#[from] serde_json::Error),
}
