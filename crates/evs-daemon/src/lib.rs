//! evs-daemon library target.
//!
//! Exposes the router, state and ledger-tail task for integration tests.
//! The binary `main.rs` depends on this library target.

pub mod api_types;
pub mod routes;
pub mod snapshot;
pub mod state;
pub mod tail;
