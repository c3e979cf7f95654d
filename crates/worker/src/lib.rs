//! Pipeline workers.
//!
//! - Cycle controller (one fetch → transform → load → commit pass)
//! - Quality gate (windowed assertions over the curated table)
//! - Scheduler (cycle, quality and metrics tickers)

pub mod config;
pub mod cycle;
pub mod quality;
pub mod scheduler;

pub use config::*;
pub use cycle::*;
pub use quality::*;
pub use scheduler::*;
