//! Resolved model: record type descriptors flattened once at startup for runtime use.

use crate::model::descriptor::{FieldDef, FieldSpec, Relation, Resource};
use crate::model::tag::FieldTag;
use std::collections::HashMap;
use std::sync::Arc;

/// Coarse value class of a declared type, used for casts and coercion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Float,
    Bool,
    Text,
    Timestamp,
    NaiveTimestamp,
    Date,
    Uuid,
    Json,
    Other,
}

#[derive(Clone, Debug)]
pub struct ResolvedField {
    pub name: String,
    pub declared_type: String,
    pub json_name: String,
    pub tag: FieldTag,
    pub unique: bool,
    pub default_value: Option<String>,
    /// False for `db:"-"` fields and relation holders.
    pub column: bool,
}

impl ResolvedField {
    fn from_spec(spec: &FieldSpec) -> Self {
        let json_name = spec
            .json
            .and_then(|j| j.split(',').next())
            .map(str::trim)
            .filter(|j| !j.is_empty())
            .unwrap_or(spec.name)
            .to_string();

        let mut field = ResolvedField {
            name: spec.name.to_string(),
            declared_type: spec.ty.to_string(),
            json_name,
            tag: FieldTag::parse(spec.tag),
            unique: false,
            default_value: None,
            column: true,
        };

        // db:"uniqueIndex;type:varchar(255);default:0"
        for segment in spec.db.split(';').map(str::trim) {
            if segment == "-" {
                field.column = false;
            } else if let Some(value) = segment.strip_prefix("default:") {
                field.default_value = Some(value.to_string());
            } else if segment.starts_with("unique") {
                field.unique = true;
            }
        }
        field
    }

    /// Declared type with `Option<..>` / `Box<..>` wrappers removed.
    pub fn inner_type(&self) -> &str {
        let mut ty = self.declared_type.trim();
        loop {
            let stripped = ["Option<", "Box<"]
                .iter()
                .find_map(|p| ty.strip_prefix(p).and_then(|rest| rest.strip_suffix('>')));
            match stripped {
                Some(inner) => ty = inner.trim(),
                None => return ty,
            }
        }
    }

    pub fn is_optional(&self) -> bool {
        self.declared_type.trim().starts_with("Option<")
    }

    pub fn kind(&self) -> FieldKind {
        let ty = self.inner_type();
        let base = ty.split('<').next().unwrap_or(ty).trim();
        let last = base.rsplit("::").next().unwrap_or(base);
        match last {
            "i8" | "i16" | "i32" | "i64" | "u8" | "u16" | "u32" | "u64" | "isize" | "usize" => FieldKind::Integer,
            "f32" | "f64" => FieldKind::Float,
            "bool" => FieldKind::Bool,
            "String" | "&str" | "str" => FieldKind::Text,
            "NaiveDateTime" => FieldKind::NaiveTimestamp,
            "NaiveDate" => FieldKind::Date,
            "Uuid" => FieldKind::Uuid,
            "Value" => FieldKind::Json,
            "DateTime" => FieldKind::Timestamp,
            _ => FieldKind::Other,
        }
    }

    /// PostgreSQL type used to cast bound parameters for this column.
    pub fn pg_cast(&self) -> Option<&'static str> {
        match self.kind() {
            FieldKind::Integer => Some("int8"),
            FieldKind::Float => Some("float8"),
            FieldKind::Bool => Some("bool"),
            FieldKind::Text => Some("text"),
            FieldKind::Timestamp => Some("timestamptz"),
            FieldKind::NaiveTimestamp => Some("timestamp"),
            FieldKind::Date => Some("date"),
            FieldKind::Uuid => Some("uuid"),
            FieldKind::Json => Some("jsonb"),
            FieldKind::Other => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResolvedModel {
    pub name: String,
    pub table: String,
    pub primary_key: String,
    pub relations: Vec<Relation>,
    ordered_fields: Vec<ResolvedField>,
    /// Field name -> index into `ordered_fields`.
    fields: HashMap<String, usize>,
}

impl ResolvedModel {
    fn new(name: &str, table: &str, primary_key: &str, relations: Vec<Relation>) -> Self {
        ResolvedModel {
            name: name.to_string(),
            table: table.to_string(),
            primary_key: primary_key.to_string(),
            relations,
            ordered_fields: Vec::new(),
            fields: HashMap::new(),
        }
    }

    /// Fields in declaration order, embedded fields merged in place.
    pub fn ordered_fields(&self) -> &[ResolvedField] {
        &self.ordered_fields
    }

    pub fn field(&self, name: &str) -> Option<&ResolvedField> {
        self.fields.get(name).map(|&i| &self.ordered_fields[i])
    }

    pub fn field_by_json(&self, json_name: &str) -> Option<&ResolvedField> {
        self.ordered_fields.iter().find(|f| f.json_name == json_name)
    }

    pub fn columns(&self) -> impl Iterator<Item = &ResolvedField> {
        self.ordered_fields.iter().filter(|f| f.column)
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Soft-deletable when the record carries a `deleted_at` column.
    pub fn soft_delete(&self) -> bool {
        self.field_by_json("deleted_at").map(|f| f.column).unwrap_or(false)
    }

    /// JSON names of fields marked unique by their persistence annotation.
    pub fn unique_fields(&self) -> Vec<&str> {
        self.ordered_fields
            .iter()
            .filter(|f| f.unique)
            .map(|f| f.json_name.as_str())
            .collect()
    }

    /// Column -> PostgreSQL cast for every column with a known type.
    pub fn casts(&self) -> HashMap<String, String> {
        self.columns()
            .filter_map(|f| f.pg_cast().map(|c| (f.json_name.clone(), c.to_string())))
            .collect()
    }

    fn push(&mut self, field: ResolvedField) {
        // A later declaration with the same name shadows the earlier one in place.
        if let Some(&i) = self.fields.get(&field.name) {
            self.ordered_fields[i] = field;
            return;
        }
        self.fields.insert(field.name.clone(), self.ordered_fields.len());
        self.ordered_fields.push(field);
    }
}

fn deep_resolve(model: &mut ResolvedModel, defs: Vec<FieldDef>) {
    for def in defs {
        match def {
            FieldDef::Embedded { fields, .. } => deep_resolve(model, fields()),
            FieldDef::Field(spec) => model.push(ResolvedField::from_spec(&spec)),
        }
    }
}

struct ModelSource {
    name: &'static str,
    table: &'static str,
    primary_key: &'static str,
    fields: fn() -> Vec<FieldDef>,
    relations: fn() -> Vec<Relation>,
}

impl ModelSource {
    fn resolve(&self) -> ResolvedModel {
        let mut model = ResolvedModel::new(self.name, self.table, self.primary_key, (self.relations)());
        deep_resolve(&mut model, (self.fields)());
        let relation_names: Vec<String> = model.relations.iter().map(|r| r.name.clone()).collect();
        for field in &mut model.ordered_fields {
            if relation_names.contains(&field.json_name) {
                field.column = false;
            }
        }
        model
    }
}

/// Record types registered for resolution. Populate at startup, then call
/// [`ModelCollection::resolve_all`] once and hand the registry to the engine.
#[derive(Default)]
pub struct ModelCollection {
    sources: Vec<ModelSource>,
}

impl ModelCollection {
    pub fn new() -> Self {
        ModelCollection::default()
    }

    pub fn register<T: Resource>(mut self) -> Self {
        self.register_mut::<T>();
        self
    }

    pub fn register_mut<T: Resource>(&mut self) {
        self.sources.push(ModelSource {
            name: T::TYPE_NAME,
            table: T::TABLE,
            primary_key: T::PRIMARY_KEY,
            fields: T::fields,
            relations: T::relations,
        });
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Resolves every registered type. A type registered twice resolves to its last registration.
    pub fn resolve_all(&self) -> ModelRegistry {
        let mut by_name = HashMap::new();
        for source in &self.sources {
            let model = source.resolve();
            tracing::debug!(model = %model.name, fields = model.ordered_fields.len(), "resolved model");
            by_name.insert(model.name.clone(), Arc::new(model));
        }
        ModelRegistry { by_name }
    }
}

/// Immutable lookup table of resolved models, shared by all requests.
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    by_name: HashMap<String, Arc<ResolvedModel>>,
}

impl ModelRegistry {
    /// `None` when `T` was never registered; callers must handle absence.
    pub fn get<T: Resource>(&self) -> Option<Arc<ResolvedModel>> {
        self.get_by_name(T::TYPE_NAME)
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<ResolvedModel>> {
        self.by_name.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::descriptor::Fields;
    use serde::{Deserialize, Serialize};

    struct Timestamps;

    impl Fields for Timestamps {
        const TYPE_NAME: &'static str = "Timestamps";

        fn fields() -> Vec<FieldDef> {
            vec![
                FieldDef::field("created_at", "DateTime<Utc>"),
                FieldDef::field("updated_at", "DateTime<Utc>"),
            ]
        }
    }

    struct Base;

    impl Fields for Base {
        const TYPE_NAME: &'static str = "Base";

        fn fields() -> Vec<FieldDef> {
            vec![
                FieldDef::field("id", "u64").db("primaryKey"),
                FieldDef::embed::<Timestamps>(),
                FieldDef::field("deleted_at", "Option<DateTime<Utc>>"),
            ]
        }
    }

    #[derive(Default, Serialize, Deserialize)]
    struct Account {
        id: u64,
        email: String,
    }

    impl Fields for Account {
        const TYPE_NAME: &'static str = "Account";

        fn fields() -> Vec<FieldDef> {
            vec![
                FieldDef::embed_indirect::<Base>(),
                FieldDef::field("email", "String")
                    .json("email,omitempty")
                    .tag("list:fussy")
                    .db("uniqueIndex;type:varchar(255)"),
                FieldDef::field("status", "i32").db("default:1"),
                FieldDef::field("profile", "Option<Box<Profile>>").db("-"),
                FieldDef::field("posts", "Vec<Post>"),
            ]
        }
    }

    impl Resource for Account {
        const TABLE: &'static str = "accounts";

        fn relations() -> Vec<Relation> {
            vec![Relation::to_many("posts", "posts", "id", "account_id")]
        }
    }

    fn registry() -> ModelRegistry {
        ModelCollection::new().register::<Account>().resolve_all()
    }

    #[test]
    fn flattens_embedded_fields_in_declaration_order() {
        let model = registry().get::<Account>().expect("registered");
        let names: Vec<&str> = model.ordered_fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["id", "created_at", "updated_at", "deleted_at", "email", "status", "profile", "posts"]
        );
        assert_eq!(model.ordered_fields().len(), 8);
        assert!(model.field("created_at").is_some());
    }

    #[test]
    fn parses_persistence_annotations() {
        let model = registry().get::<Account>().expect("registered");
        let email = model.field("email").expect("email");
        assert!(email.unique);
        assert_eq!(email.json_name, "email");
        assert_eq!(email.tag.get("list"), Some("fussy"));
        assert_eq!(model.field("status").and_then(|f| f.default_value.as_deref()), Some("1"));
        assert!(!model.field("status").map(|f| f.unique).unwrap_or(true));
        assert_eq!(model.unique_fields(), vec!["email"]);
    }

    #[test]
    fn relation_and_ignored_fields_are_not_columns() {
        let model = registry().get::<Account>().expect("registered");
        assert!(!model.field("profile").map(|f| f.column).unwrap_or(true));
        assert!(!model.field("posts").map(|f| f.column).unwrap_or(true));
        assert!(model.columns().all(|f| f.name != "posts"));
        assert!(model.soft_delete());
    }

    #[test]
    fn kinds_and_casts_follow_declared_types() {
        let model = registry().get::<Account>().expect("registered");
        assert_eq!(model.field("deleted_at").map(|f| f.kind()), Some(FieldKind::Timestamp));
        assert_eq!(model.field("deleted_at").map(|f| f.is_optional()), Some(true));
        assert_eq!(model.field("id").and_then(|f| f.pg_cast()), Some("int8"));
        let casts = model.casts();
        assert_eq!(casts.get("email").map(String::as_str), Some("text"));
        assert!(!casts.contains_key("posts"));
    }

    #[test]
    fn unregistered_type_is_absent() {
        let registry = ModelCollection::new().resolve_all();
        assert!(registry.get::<Account>().is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn resolving_twice_replaces_entries() {
        let collection = ModelCollection::new().register::<Account>().register::<Account>();
        assert_eq!(collection.len(), 2);
        let first = collection.resolve_all();
        let second = collection.resolve_all();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(
            first.get::<Account>().map(|m| m.ordered_fields().len()),
            second.get::<Account>().map(|m| m.ordered_fields().len())
        );
    }
}
