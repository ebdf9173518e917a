pub mod descriptor;
pub mod resolver;
pub mod tag;

pub use descriptor::*;
pub use resolver::*;
pub use tag::*;
