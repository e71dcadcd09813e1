use chrono::{DateTime, Utc};
use lnpay_core::{CoreError, PaymentHash};
use lnpay_htlc::{HtlcError, WireFailure};
use lnpay_routing::{BudgetViolation, RoutingError};
use serde::{Deserialize, Serialize};

/// Errors surfaced by pay, sendpay and the other payment operations.
///
/// Each variant maps to a stable numeric code via [`PayError::code`]; the HTTP API
/// returns both. Exhaustion errors are persisted with the pay status entry so an
/// identical later call can return them without retrying.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PayError {
    #[error("{0}")]
    InvalidParams(String),

    #[error("Payment {0} is in progress")]
    InProgress(PaymentHash),

    #[error("{0}")]
    TryOtherRoute(WireFailure),

    #[error("{0}")]
    DestinationPermFail(WireFailure),

    #[error("{0}")]
    RouteNotFound(String),

    #[error("{0}")]
    RouteTooExpensive(BudgetViolation),

    #[error("Invoice expired at {0}")]
    InvoiceExpired(DateTime<Utc>),

    #[error("Never attempted payment for '{0}'")]
    NoSuchPayment(PaymentHash),

    #[error("{message}")]
    StoppedRetrying { attempts: usize, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl PayError {
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidParams(_) => -32602,
            Self::Internal(_) => -1,
            Self::InProgress(_) => 200,
            Self::TryOtherRoute(_) => 202,
            Self::DestinationPermFail(_) => 203,
            Self::RouteNotFound(_) => 205,
            Self::RouteTooExpensive(_) => 206,
            Self::InvoiceExpired(_) => 207,
            Self::NoSuchPayment(_) => 208,
            Self::StoppedRetrying { .. } => 210,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }
}

impl From<CoreError> for PayError {
    fn from(e: CoreError) -> Self {
        Self::InvalidParams(e.to_string())
    }
}

impl From<RoutingError> for PayError {
    fn from(e: RoutingError) -> Self {
        match e {
            RoutingError::RouteNotFound { .. } => Self::RouteNotFound(e.to_string()),
            RoutingError::InvalidRoute { .. } | RoutingError::InvalidHint { .. } => {
                Self::InvalidParams(e.to_string())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<HtlcError> for PayError {
    fn from(e: HtlcError) -> Self {
        match e {
            HtlcError::InvalidFee(_)
            | HtlcError::InvalidAmount(_)
            | HtlcError::UnknownChannel(_)
            | HtlcError::ChannelNotActive { .. }
            | HtlcError::NoActiveChannel(_)
            | HtlcError::DuplicateLabel(_)
            | HtlcError::UnknownInvoice(_)
            | HtlcError::DuplicateForward { .. }
            | HtlcError::ForwardNotFound { .. }
            | HtlcError::Encoding(_) => Self::InvalidParams(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for PayError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e.to_string())
    }
}
