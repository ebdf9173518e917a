//! Safe SQL: identifiers from model metadata only, values as parameters.

mod builder;
pub mod params;
pub mod query;
pub use builder::*;
pub use params::*;
pub use query::*;
