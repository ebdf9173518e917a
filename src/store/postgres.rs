//! Store execution against PostgreSQL.

use crate::error::AppError;
use crate::sql::{self, DeleteMode, PgBindValue, QueryBuf, SelectQuery, Target};
use crate::store::Store;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::PgPool;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn bind<'q>(q: &'q QueryBuf) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        query
    }

    async fn query_many(&self, q: &QueryBuf) -> Result<Vec<Value>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = Self::bind(q).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn query_optional(&self, q: &QueryBuf) -> Result<Option<Value>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = Self::bind(q).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| row_to_json(&r)))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn fetch_one(&self, query: &SelectQuery) -> Result<Option<Value>, AppError> {
        let mut query = query.clone();
        query.limit = Some(1);
        self.query_optional(&sql::select(&query)).await
    }

    async fn fetch_all(&self, query: &SelectQuery) -> Result<Vec<Value>, AppError> {
        self.query_many(&sql::select(query)).await
    }

    async fn count(&self, query: &SelectQuery) -> Result<u64, AppError> {
        let q = sql::count(query);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut scalar = sqlx::query_scalar::<_, i64>(&q.sql);
        for p in &q.params {
            scalar = scalar.bind(PgBindValue::from_json(p));
        }
        let n = scalar.fetch_one(&self.pool).await?;
        Ok(n.max(0) as u64)
    }

    async fn exists(&self, query: &SelectQuery) -> Result<bool, AppError> {
        let q = sql::exists(query);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut scalar = sqlx::query_scalar::<_, bool>(&q.sql);
        for p in &q.params {
            scalar = scalar.bind(PgBindValue::from_json(p));
        }
        Ok(scalar.fetch_one(&self.pool).await?)
    }

    async fn insert(&self, target: &Target, row: &Map<String, Value>) -> Result<Value, AppError> {
        self.query_optional(&sql::insert(target, row))
            .await?
            .ok_or_else(|| AppError::Db(sqlx::Error::RowNotFound))
    }

    async fn update(
        &self,
        target: &Target,
        id: u64,
        changes: &Map<String, Value>,
    ) -> Result<Option<Value>, AppError> {
        self.query_optional(&sql::update(target, id, changes)).await
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn delete(&self, target: &Target, id: u64, mode: DeleteMode) -> Result<bool, AppError> {
        let q = sql::delete(target, id, mode);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let result = Self::bind(&q).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_json(row: &sqlx::postgres::PgRow) -> Value {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let name = col.name();
        let v = cell_to_value(row, name);
        map.insert(name.to_string(), v);
    }
    Value::Object(map)
}

fn cell_to_value(row: &sqlx::postgres::PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<serde_json::Value>, _>(name) {
        return j;
    }
    Value::Null
}
