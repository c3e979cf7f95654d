//! Record sources for the transaction pipeline.
//!
//! Every source hands out bounded batches and only moves its durable
//! cursor when the caller commits, which gives at-least-once delivery.

pub mod checkpoint;
pub mod config;
pub mod consumer;
pub mod file;
pub mod health;
pub mod source;

pub use checkpoint::*;
pub use config::*;
pub use consumer::*;
pub use file::*;
pub use source::*;
