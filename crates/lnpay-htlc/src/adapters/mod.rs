//! Dispatcher implementations.

pub mod simulated;
