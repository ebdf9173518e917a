//! Persistence collaborator: executes structured queries and returns JSON rows.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::AppError;
use crate::sql::{DeleteMode, SelectQuery, Target};
use async_trait::async_trait;
use serde_json::{Map, Value};

#[async_trait]
pub trait Store: Send + Sync {
    async fn fetch_one(&self, query: &SelectQuery) -> Result<Option<Value>, AppError>;

    async fn fetch_all(&self, query: &SelectQuery) -> Result<Vec<Value>, AppError>;

    /// Row count ignoring projection, order and pagination.
    async fn count(&self, query: &SelectQuery) -> Result<u64, AppError>;

    async fn exists(&self, query: &SelectQuery) -> Result<bool, AppError>;

    /// Insert one row; columns absent from `row` take their default. Returns the stored row.
    async fn insert(&self, target: &Target, row: &Map<String, Value>) -> Result<Value, AppError>;

    /// Update one row by primary key. `None` when no row matched.
    async fn update(
        &self,
        target: &Target,
        id: u64,
        changes: &Map<String, Value>,
    ) -> Result<Option<Value>, AppError>;

    /// Returns whether a row was affected.
    async fn delete(&self, target: &Target, id: u64, mode: DeleteMode) -> Result<bool, AppError>;

    /// Connectivity probe used by the readiness route.
    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}
