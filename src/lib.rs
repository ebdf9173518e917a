//! Resource engine: declarative CRUD for record types over axum and PostgreSQL.

pub mod cache;
pub mod engine;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod model;
pub mod response;
pub mod routes;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;
pub mod store;

pub use cache::KeyValueCache;
pub use engine::{FilterKind, Flow, RequestContext, Stage};
pub use error::{AppError, FieldErrors, SettingsError};
pub use model::{FieldDef, Fields, ModelCollection, ModelRegistry, Relation, Resource};
pub use response::Reply;
pub use routes::{common_routes, resource_routes};
pub use settings::Settings;
pub use state::AppState;
pub use store::{MemoryStore, PgStore, Store};
