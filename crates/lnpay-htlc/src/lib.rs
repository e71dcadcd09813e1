//! lnpay HTLC layer
//!
//! The seam between the payment core and whatever actually moves HTLCs over
//! channels, plus the bookkeeping a node keeps about HTLCs it receives and forwards:
//!
//! - [`HtlcDispatcher`]: dispatch a route and learn its outcome.
//! - [`WireFailure`]: classified relay error with the erring hop and optional update.
//! - [`InvoiceRegistry`]: invoices this node issued and their payment state.
//! - [`ForwardingLedger`]: lifecycle of HTLCs forwarded for others.
//! - [`ChannelFeePolicy`]: per-channel fee overrides over a global default.
//! - [`SimulatedNetwork`]: an in-process network of nodes implementing the dispatcher.

pub mod adapters;
pub mod error;
pub mod fees;
pub mod forwards;
pub mod invoices;
pub mod traits;
pub mod types;

pub use adapters::simulated::{ChannelDescription, NetworkDescription, SimulatedNetwork};
pub use error::HtlcError;
pub use fees::{
    ChannelFeePolicy, ChannelFeeSetting, ChannelState, FeeChange, FeeSchedule, FeeTarget,
    LocalChannel,
};
pub use forwards::{ChannelStats, ForwardFilter, ForwardState, ForwardedPayment, ForwardingLedger};
pub use invoices::{InvoiceRecord, InvoiceRegistry, InvoiceStatus, NewInvoice};
pub use traits::HtlcDispatcher;
pub use types::{DispatchOutcome, FailureCode, HtlcResolution, WireFailure};
