//! Core types, record shapes and the batch transformer for the transaction pipeline.

pub mod error;
pub mod record;
pub mod transform;

pub use error::{Error, FailureClass, Result, StoreErrorCode};
pub use record::*;
pub use transform::{transform, transform_at, MANDATORY_FIELDS};
