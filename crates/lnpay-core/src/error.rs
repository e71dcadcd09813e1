use crate::state_machine::PayState;

/// Core errors: identifier parsing, invoice decoding and state transitions.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: PayState, to: PayState },

    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("Given id is not a channel ID or short channel ID: {0}")]
    InvalidChannelId(String),

    #[error("invalid hex value: {0}")]
    InvalidHex(String),

    #[error("invalid invoice: {0}")]
    InvoiceDecode(String),

    #[error("invoice checksum mismatch")]
    ChecksumMismatch,

    #[error("validation failed: {0}")]
    ValidationError(String),
}
