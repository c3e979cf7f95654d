//! Store writer for the transaction pipeline.
//!
//! Two tables: `raw_transactions` (insert-only audit trail) and
//! `transactions_flat` (query table, last write wins). Both are keyed by
//! `transaction_id`, so replaying a batch converges to the same state.

pub mod client;
pub mod config;
pub mod health;
pub mod insert;
pub mod query;
pub mod schema;
pub mod store;

pub use client::*;
pub use config::*;
pub use store::*;
