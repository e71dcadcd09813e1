//! lnpay node
//!
//! The payment-dispatch core wired into a running node:
//!
//! - [`PaymentStore`]: durable SendPay records, pay status with attempt ledgers, forwards.
//! - [`PaymentService`]: pay, sendpay/waitsendpay, listings, fee settings, restart
//!   reconciliation.
//! - [`Forwarder`]: relays HTLCs for other payers and keeps the forwarding ledger.
//! - [`api`]: the HTTP surface used by the `lnpay` CLI.

pub mod api;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod pay;
pub mod service;
pub mod storage;
pub mod store;

pub use config::NodeConfig;
pub use error::PayError;
pub use forwarder::{Forwarder, InboundHtlc};
pub use pay::{PayRequest, PayResponse};
pub use service::{NodeInfo, PaymentService};
pub use store::{
    Attempt, AttemptFailure, AttemptOutcome, NewSendPay, PayParams, PayStatusEntry, PaymentStore,
    SendPayFilter, SendPayRecord, SendPayStatus,
};
