use lnpay_core::{NodeId, ShortChannelId};

use crate::forwards::ForwardState;
use crate::invoices::InvoiceStatus;

/// Errors from the HTLC bookkeeping layer.
#[derive(Debug, thiserror::Error)]
pub enum HtlcError {
    #[error("Duplicate label '{0}'")]
    DuplicateLabel(String),

    #[error("Unknown invoice '{0}'")]
    UnknownInvoice(String),

    #[error("invoice '{label}' is {status}, not unpaid")]
    InvoiceNotUnpaid { label: String, status: InvoiceStatus },

    #[error("Unknown channel {0}")]
    UnknownChannel(ShortChannelId),

    #[error("Channel is in state {state}")]
    ChannelNotActive { scid: ShortChannelId, state: String },

    #[error("Could not find active channel of peer with that id: {0}")]
    NoActiveChannel(NodeId),

    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid fee: {0}")]
    InvalidFee(String),

    #[error("forward {in_channel}/{in_htlc_id} already recorded")]
    DuplicateForward {
        in_channel: ShortChannelId,
        in_htlc_id: u64,
    },

    #[error("forward {in_channel}/{in_htlc_id} not found")]
    ForwardNotFound {
        in_channel: ShortChannelId,
        in_htlc_id: u64,
    },

    #[error("forward {in_channel}/{in_htlc_id} is already {state}")]
    ForwardResolved {
        in_channel: ShortChannelId,
        in_htlc_id: u64,
        state: ForwardState,
    },

    #[error("invoice encoding failed: {0}")]
    Encoding(#[from] lnpay_core::CoreError),
}
