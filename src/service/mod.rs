//! Validation service for request payloads.

pub mod validation;
pub use validation::{strip_unique, RequestValidator, Rules};
