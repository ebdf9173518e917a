//! In-process store over JSON rows. Evaluates structured predicates directly;
//! used by tests and by the demo server when no database is configured.

use crate::error::AppError;
use crate::model::{Relation, RelationKind};
use crate::sql::{DeleteMode, Predicate, SelectQuery, SortOrder, Target, SOFT_DELETE_COLUMN};
use crate::store::Store;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

type Row = Map<String, Value>;

#[derive(Default)]
struct MemTable {
    rows: Vec<Row>,
    next_id: u64,
}

impl MemTable {
    fn allocate_id(&mut self, pk: &str) -> u64 {
        let max_seen = self
            .rows
            .iter()
            .filter_map(|r| r.get(pk).and_then(Value::as_u64))
            .max()
            .unwrap_or(0);
        self.next_id = self.next_id.max(max_seen) + 1;
        self.next_id
    }

    fn position(&self, pk: &str, id: u64) -> Option<usize> {
        self.rows
            .iter()
            .position(|r| r.get(pk).and_then(Value::as_u64) == Some(id))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, MemTable>>,
}

fn lock_err() -> AppError {
    AppError::Persistence("memory store lock poisoned".into())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rows to `table`, assigning `id` where it is missing.
    pub fn seed(&self, table: &str, rows: Vec<Value>) -> Result<(), AppError> {
        let mut tables = self.tables.write().map_err(|_| lock_err())?;
        let t = tables.entry(table.to_string()).or_default();
        for row in rows {
            let Value::Object(mut row) = row else {
                return Err(AppError::Persistence(format!("seed row for {} is not an object", table)));
            };
            if row.get("id").and_then(Value::as_u64).is_none() {
                let id = t.allocate_id("id");
                row.insert("id".into(), Value::from(id));
            }
            t.rows.push(row);
        }
        Ok(())
    }

    /// Snapshot of every stored row in `table`, including soft-deleted ones.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .read()
            .map(|tables| {
                tables
                    .get(table)
                    .map(|t| t.rows.iter().cloned().map(Value::Object).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn select_rows(&self, query: &SelectQuery, paged: bool) -> Result<Vec<Value>, AppError> {
        let tables = self.tables.read().map_err(|_| lock_err())?;
        let Some(table) = tables.get(&query.target.table.name) else {
            return Ok(Vec::new());
        };

        let mut matched = Vec::new();
        for row in &table.rows {
            if matches_all(row, &query.predicates)? {
                matched.push(row);
            }
        }

        if !paged {
            return Ok(matched.into_iter().cloned().map(Value::Object).collect());
        }

        let (order_col, order) = query
            .order
            .clone()
            .unwrap_or_else(|| (query.target.primary_key.clone(), SortOrder::Asc));
        matched.sort_by(|a, b| {
            let ord = compare(
                a.get(&order_col).unwrap_or(&Value::Null),
                b.get(&order_col).unwrap_or(&Value::Null),
            )
            .unwrap_or(Ordering::Equal);
            match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|n| n as usize).unwrap_or(usize::MAX);

        let out = matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| {
                let mut out = project(row, &query.columns);
                for rel in query.preloads.iter().chain(query.joins.iter()) {
                    out.insert(rel.name.clone(), related(&tables, row, rel));
                }
                Value::Object(out)
            })
            .collect();
        Ok(out)
    }
}

fn project(row: &Row, columns: &[String]) -> Row {
    if columns.is_empty() {
        return row.clone();
    }
    columns
        .iter()
        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
        .collect()
}

fn related(tables: &HashMap<String, MemTable>, row: &Row, rel: &Relation) -> Value {
    let key = row.get(&rel.our_key).cloned().unwrap_or(Value::Null);
    let mut hits = tables
        .get(&rel.table)
        .map(|t| {
            t.rows
                .iter()
                .filter(|r| !key.is_null() && values_eq(r.get(&rel.their_key).unwrap_or(&Value::Null), &key))
                .cloned()
                .map(Value::Object)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    match rel.kind {
        RelationKind::ToOne => {
            if hits.is_empty() {
                Value::Null
            } else {
                hits.swap_remove(0)
            }
        }
        RelationKind::ToMany => Value::Array(hits),
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        _ => None,
    }
}

fn values_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

fn non_null<'a>(row: &'a Row, column: &str) -> Option<&'a Value> {
    row.get(column).filter(|v| !v.is_null())
}

fn matches_all(row: &Row, predicates: &[Predicate]) -> Result<bool, AppError> {
    for p in predicates {
        if !matches(row, p)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// SQL-like semantics: comparisons against NULL never match.
fn matches(row: &Row, p: &Predicate) -> Result<bool, AppError> {
    Ok(match p {
        Predicate::Eq { column, value } => non_null(row, column).is_some_and(|v| values_eq(v, value)),
        Predicate::NotEq { column, value } => non_null(row, column).is_some_and(|v| !values_eq(v, value)),
        Predicate::In { column, values } => {
            non_null(row, column).is_some_and(|v| values.iter().any(|x| values_eq(v, x)))
        }
        Predicate::Contains { column, needle } => non_null(row, column).is_some_and(|v| match v {
            Value::String(s) => s.contains(needle.as_str()),
            other => other.to_string().contains(needle.as_str()),
        }),
        Predicate::Between { column, low, high } => non_null(row, column).is_some_and(|v| {
            matches!(compare(v, low), Some(Ordering::Greater | Ordering::Equal))
                && matches!(compare(v, high), Some(Ordering::Less | Ordering::Equal))
        }),
        Predicate::Gte { column, value } => non_null(row, column)
            .is_some_and(|v| matches!(compare(v, value), Some(Ordering::Greater | Ordering::Equal))),
        Predicate::Lte { column, value } => non_null(row, column)
            .is_some_and(|v| matches!(compare(v, value), Some(Ordering::Less | Ordering::Equal))),
        Predicate::IsNull { column } => non_null(row, column).is_none(),
        Predicate::IsNotNull { column } => non_null(row, column).is_some(),
        Predicate::Any(group) => {
            if group.is_empty() {
                return Ok(true);
            }
            for inner in group {
                if matches(row, inner)? {
                    return Ok(true);
                }
            }
            false
        }
        Predicate::Raw { sql, .. } => {
            return Err(AppError::Persistence(format!(
                "raw predicate not supported by the memory store: {}",
                sql
            )))
        }
    })
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch_one(&self, query: &SelectQuery) -> Result<Option<Value>, AppError> {
        let mut query = query.clone();
        query.limit = Some(1);
        Ok(self.select_rows(&query, true)?.into_iter().next())
    }

    async fn fetch_all(&self, query: &SelectQuery) -> Result<Vec<Value>, AppError> {
        self.select_rows(query, true)
    }

    async fn count(&self, query: &SelectQuery) -> Result<u64, AppError> {
        Ok(self.select_rows(query, false)?.len() as u64)
    }

    async fn exists(&self, query: &SelectQuery) -> Result<bool, AppError> {
        Ok(!self.select_rows(query, false)?.is_empty())
    }

    async fn insert(&self, target: &Target, row: &Map<String, Value>) -> Result<Value, AppError> {
        let mut tables = self.tables.write().map_err(|_| lock_err())?;
        let t = tables.entry(target.table.name.clone()).or_default();
        let pk = &target.primary_key;
        let mut row = row.clone();
        let id = match row.get(pk).and_then(Value::as_u64) {
            Some(id) if id > 0 => {
                if t.position(pk, id).is_some() {
                    return Err(AppError::Persistence(format!(
                        "duplicate key {} = {} in {}",
                        pk, id, target.table.name
                    )));
                }
                id
            }
            _ => t.allocate_id(pk),
        };
        row.insert(pk.clone(), Value::from(id));
        t.rows.push(row.clone());
        tracing::debug!(table = %target.table.name, id, "memory insert");
        Ok(Value::Object(row))
    }

    async fn update(
        &self,
        target: &Target,
        id: u64,
        changes: &Map<String, Value>,
    ) -> Result<Option<Value>, AppError> {
        let mut tables = self.tables.write().map_err(|_| lock_err())?;
        let Some(t) = tables.get_mut(&target.table.name) else {
            return Ok(None);
        };
        let pk = &target.primary_key;
        let Some(pos) = t.position(pk, id) else {
            return Ok(None);
        };
        let row = &mut t.rows[pos];
        for (k, v) in changes {
            if k != pk {
                row.insert(k.clone(), v.clone());
            }
        }
        tracing::debug!(table = %target.table.name, id, "memory update");
        Ok(Some(Value::Object(row.clone())))
    }

    async fn delete(&self, target: &Target, id: u64, mode: DeleteMode) -> Result<bool, AppError> {
        let mut tables = self.tables.write().map_err(|_| lock_err())?;
        let Some(t) = tables.get_mut(&target.table.name) else {
            return Ok(false);
        };
        let Some(pos) = t.position(&target.primary_key, id) else {
            return Ok(false);
        };
        let deleted = non_null(&t.rows[pos], SOFT_DELETE_COLUMN).is_some();
        let affected = match mode {
            DeleteMode::Permanent => {
                t.rows.remove(pos);
                true
            }
            DeleteMode::Soft if !deleted => {
                let now = chrono::Utc::now().to_rfc3339();
                t.rows[pos].insert(SOFT_DELETE_COLUMN.into(), Value::String(now));
                true
            }
            DeleteMode::Restore if deleted => {
                t.rows[pos].insert(SOFT_DELETE_COLUMN.into(), Value::Null);
                true
            }
            _ => false,
        };
        tracing::debug!(table = %target.table.name, id, ?mode, affected, "memory delete");
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::TableRef;
    use serde_json::json;

    fn target() -> Target {
        Target::new(TableRef::new("users"), "id")
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .seed(
                "users",
                vec![
                    json!({"name": "ann", "age": 31, "deleted_at": null}),
                    json!({"name": "bob", "age": 17, "deleted_at": null}),
                    json!({"name": "cat", "age": 45, "deleted_at": "2024-01-01T00:00:00Z"}),
                ],
            )
            .unwrap();
        store
            .seed("posts", vec![json!({"user_id": 1, "title": "a"}), json!({"user_id": 1, "title": "b"})])
            .unwrap();
        store
    }

    #[tokio::test]
    async fn filters_and_orders() {
        let store = seeded();
        let mut q = SelectQuery::new(target());
        q.predicates.push(Predicate::is_null("deleted_at"));
        q.predicates.push(Predicate::between("age", json!(18), json!(60)));
        let rows = store.fetch_all(&q).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "ann");

        let mut q = SelectQuery::new(target());
        q.order_by("age", SortOrder::Desc);
        let names: Vec<_> = store.fetch_all(&q).await.unwrap().iter().map(|r| r["name"].clone()).collect();
        assert_eq!(names, vec![json!("cat"), json!("ann"), json!("bob")]);
    }

    #[tokio::test]
    async fn empty_or_group_matches_everything() {
        let store = seeded();
        let mut q = SelectQuery::new(target());
        q.predicates.push(Predicate::Any(vec![]));
        assert_eq!(store.count(&q).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn raw_predicate_is_rejected() {
        let store = seeded();
        let mut q = SelectQuery::new(target());
        q.predicates.push(Predicate::raw("age > ?", vec![json!(1)]));
        assert!(store.fetch_all(&q).await.is_err());
    }

    #[tokio::test]
    async fn preload_attaches_related_rows() {
        let store = seeded();
        let mut q = SelectQuery::new(target());
        q.columns = vec!["name".into()];
        q.preloads.push(Relation::to_many("posts", "posts", "id", "user_id"));
        let rows = store.fetch_all(&q).await.unwrap();
        assert_eq!(rows[0]["posts"].as_array().map(Vec::len), Some(2));
        assert_eq!(rows[1]["posts"], json!([]));
        assert!(rows[0].get("id").is_none());
    }

    #[tokio::test]
    async fn soft_delete_then_restore() {
        let store = seeded();
        assert!(store.delete(&target(), 1, DeleteMode::Soft).await.unwrap());
        assert!(!store.delete(&target(), 1, DeleteMode::Soft).await.unwrap());
        assert!(store.delete(&target(), 1, DeleteMode::Restore).await.unwrap());
        assert!(!store.delete(&target(), 1, DeleteMode::Restore).await.unwrap());
        assert!(store.delete(&target(), 2, DeleteMode::Permanent).await.unwrap());
        assert_eq!(store.rows("users").len(), 2);
    }

    #[tokio::test]
    async fn insert_assigns_next_id() {
        let store = seeded();
        let row = store
            .insert(&target(), json!({"name": "dan"}).as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(row["id"], 4);
        let updated = store
            .update(&target(), 4, json!({"age": 20}).as_object().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["age"], 20);
        assert!(store.update(&target(), 99, &Map::new()).await.unwrap().is_none());
    }
}
