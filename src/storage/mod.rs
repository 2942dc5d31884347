//! SQLite persistence for the per-wallet trade ledger.
//!
//! Durable, append-only record of every observed trade plus the executor's
//! mutable processing state, and the latest position snapshots. One logical
//! ledger per tracked wallet, namespaced by address.

pub mod ledger;
pub mod schema;

pub use ledger::Ledger;
