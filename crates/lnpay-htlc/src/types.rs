use lnpay_core::{NodeId, Preimage, ShortChannelId};
use lnpay_routing::ChannelUpdate;
use serde::{Deserialize, Serialize};
use std::fmt;

const BADONION: u16 = 0x8000;
const PERM: u16 = 0x4000;
const UPDATE: u16 = 0x1000;

/// Classification of an HTLC failure, carrying the onion failure code it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    InvalidOnionHmac,
    TemporaryChannelFailure,
    PermanentChannelFailure,
    UnknownNextPeer,
    AmountBelowMinimum,
    FeeInsufficient,
    IncorrectCltvExpiry,
    ChannelDisabled,
    IncorrectOrUnknownPaymentDetails,
    FinalExpiryTooSoon,
}

impl FailureCode {
    pub fn code(&self) -> u16 {
        match self {
            Self::InvalidOnionHmac => BADONION | PERM | 5,
            Self::TemporaryChannelFailure => UPDATE | 7,
            Self::PermanentChannelFailure => PERM | 8,
            Self::UnknownNextPeer => PERM | 10,
            Self::AmountBelowMinimum => UPDATE | 11,
            Self::FeeInsufficient => UPDATE | 12,
            Self::IncorrectCltvExpiry => UPDATE | 13,
            Self::ChannelDisabled => UPDATE | 20,
            Self::IncorrectOrUnknownPaymentDetails => PERM | 15,
            Self::FinalExpiryTooSoon => 17,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.code() & PERM != 0
    }

    /// Whether a failure of this kind normally carries a channel update.
    pub fn carries_update(&self) -> bool {
        self.code() & UPDATE != 0
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidOnionHmac => "WIRE_INVALID_ONION_HMAC",
            Self::TemporaryChannelFailure => "WIRE_TEMPORARY_CHANNEL_FAILURE",
            Self::PermanentChannelFailure => "WIRE_PERMANENT_CHANNEL_FAILURE",
            Self::UnknownNextPeer => "WIRE_UNKNOWN_NEXT_PEER",
            Self::AmountBelowMinimum => "WIRE_AMOUNT_BELOW_MINIMUM",
            Self::FeeInsufficient => "WIRE_FEE_INSUFFICIENT",
            Self::IncorrectCltvExpiry => "WIRE_INCORRECT_CLTV_EXPIRY",
            Self::ChannelDisabled => "WIRE_CHANNEL_DISABLED",
            Self::IncorrectOrUnknownPaymentDetails => "WIRE_INCORRECT_OR_UNKNOWN_PAYMENT_DETAILS",
            Self::FinalExpiryTooSoon => "WIRE_FINAL_EXPIRY_TOO_SOON",
        };
        write!(f, "{name}")
    }
}

/// A failed HTLC as reported back along the route: what went wrong, where, and
/// the erring node's current view of the channel if it sent one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code} from {erring_node}: {message}")]
pub struct WireFailure {
    pub code: FailureCode,
    pub erring_node: NodeId,
    /// Index into the route of the hop whose node reported the failure; `None`
    /// when the payer itself failed before sending.
    pub erring_index: Option<usize>,
    pub erring_channel: Option<ShortChannelId>,
    pub update: Option<ChannelUpdate>,
    pub message: String,
}

impl WireFailure {
    pub fn new(code: FailureCode, erring_node: NodeId, message: impl Into<String>) -> Self {
        Self {
            code,
            erring_node,
            erring_index: None,
            erring_channel: None,
            update: None,
            message: message.into(),
        }
    }

    pub fn at_hop(mut self, index: usize) -> Self {
        self.erring_index = Some(index);
        self
    }

    pub fn on_channel(mut self, scid: ShortChannelId) -> Self {
        self.erring_channel = Some(scid);
        self
    }

    pub fn with_update(mut self, update: ChannelUpdate) -> Self {
        self.update = Some(update);
        self
    }
}

/// Terminal result of dispatching one route.
pub type DispatchOutcome = Result<Preimage, WireFailure>;

/// What the wire layer knows about the latest HTLC for a payment hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtlcResolution {
    /// No HTLC was ever sent for this hash.
    Unknown,
    InFlight,
    Fulfilled(Preimage),
    Failed(WireFailure),
}

impl HtlcResolution {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fulfilled(_) | Self::Failed(_))
    }
}
