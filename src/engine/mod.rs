//! Generic resource engine: a per-request context configured fluently, then one
//! of `get`, `list`, `create`, `update`, `delete` or `restore`.

pub mod context;
pub mod decode;
pub mod filter;
pub mod hooks;
mod ops;
pub mod whitelist;

pub use context::{RequestContext, ScanFn, TransformFn, DEFAULT_ITEM_KEY};
pub use filter::{FilterKind, FilterResolver, FilterSpec, SEARCH_PARAM};
pub use hooks::{Flow, Hook, HookSet, Stage};
pub use ops::{ORDER_PARAM, PAGE_PARAM, PAGE_SIZE_PARAM, SORT_BY_PARAM};
pub use whitelist::Whitelist;
