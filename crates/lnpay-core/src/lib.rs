//! # lnpay-core
//!
//! Shared vocabulary of the payment-dispatch core:
//!
//! - **Identifiers**: node ids, short channel ids, payment hashes and preimages
//! - **Invoices**: decoded invoice records, route hints and the invoice string codec
//! - **State machine**: the states a pay() call moves through
//! - **Configuration**: retry/budget defaults and forwarding fee defaults

pub mod config;
pub mod error;
pub mod invoice;
pub mod state_machine;
pub mod types;

pub use config::{FeeConfig, PayConfig};
pub use error::CoreError;
pub use invoice::{Invoice, RouteHint, RouteHintHop};
pub use state_machine::{PayEvent, PayState, PayStateMachine};
pub use types::{NodeId, PaymentHash, Preimage, ShortChannelId};
