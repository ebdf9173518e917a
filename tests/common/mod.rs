#![allow(dead_code)]

use chrono::{DateTime, Utc};
use resource_engine::{FieldDef, Fields, MemoryStore, ModelCollection, ModelRegistry, Relation, RequestContext, Resource};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub status: String,
    pub role: String,
    pub age: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Vec<Value>,
}

impl Fields for Member {
    const TYPE_NAME: &'static str = "Member";

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::field("id", "u64").db("primaryKey"),
            FieldDef::field("name", "String").tag("list:fussy,search"),
            FieldDef::field("email", "String").tag("list:search"),
            FieldDef::field("status", "String").tag("list:in"),
            FieldDef::field("role", "String"),
            FieldDef::field("age", "i64").tag("list:between"),
            FieldDef::field("created_at", "Option<DateTime<Utc>>"),
            FieldDef::field("updated_at", "Option<DateTime<Utc>>"),
            FieldDef::field("deleted_at", "Option<DateTime<Utc>>"),
            FieldDef::field("notes", "Vec<Note>"),
        ]
    }
}

impl Resource for Member {
    const TABLE: &'static str = "members";

    fn relations() -> Vec<Relation> {
        vec![Relation::to_many("notes", "notes", "id", "member_id")]
    }
}

pub fn models() -> ModelRegistry {
    ModelCollection::new().register::<Member>().resolve_all()
}

/// ann 31 active admin, bob 17 active user, cat 45 disabled admin,
/// dan 22 active user, eve 29 disabled user. Ann has two notes.
pub fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    let people = [
        (1, "ann", 31, "active", "admin"),
        (2, "bob", 17, "active", "user"),
        (3, "cat", 45, "disabled", "admin"),
        (4, "dan", 22, "active", "user"),
        (5, "eve", 29, "disabled", "user"),
    ];
    let rows = people
        .iter()
        .map(|(id, name, age, status, role)| {
            json!({
                "id": id,
                "name": name,
                "email": format!("{}@example.com", name),
                "status": status,
                "role": role,
                "age": age,
                "created_at": "2024-01-01T00:00:00+00:00",
                "updated_at": "2024-01-01T00:00:00+00:00",
                "deleted_at": null
            })
        })
        .collect();
    store.seed("members", rows).unwrap();
    store
        .seed(
            "notes",
            vec![
                json!({"member_id": 1, "body": "first"}),
                json!({"member_id": 1, "body": "second"}),
            ],
        )
        .unwrap();
    Arc::new(store)
}

pub fn ctx(store: &Arc<MemoryStore>, models: &ModelRegistry) -> RequestContext<Member> {
    RequestContext::new(store.clone(), models)
}

pub fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

pub fn payload(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap_or_default()
}

pub fn data_ids(body: &Value) -> Vec<u64> {
    body["data"]
        .as_array()
        .map(|rows| rows.iter().filter_map(|r| r["id"].as_u64()).collect())
        .unwrap_or_default()
}
