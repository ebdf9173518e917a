//! Request extractors.

pub mod request;
