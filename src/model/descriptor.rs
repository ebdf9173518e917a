//! Declarative field descriptors: each record type lists its fields once, in
//! declaration order, instead of being introspected at runtime.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// One declared field of a record type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    /// Rust type as written, e.g. `"Option<DateTime<Utc>>"`.
    pub ty: &'static str,
    /// JSON tag (`"email,omitempty"`); first segment is the exposed name.
    pub json: Option<&'static str>,
    /// Engine annotation set, e.g. `"list:fussy;add:required"`.
    pub tag: &'static str,
    /// Persistence annotation, e.g. `"uniqueIndex;type:varchar(255);default:0"`.
    pub db: &'static str,
}

/// A field declaration, or an embedded structure whose fields are merged
/// into the parent.
#[derive(Clone, Debug)]
pub enum FieldDef {
    Field(FieldSpec),
    Embedded {
        type_name: &'static str,
        /// Embedded through one level of indirection (`Box<Base>`, `Option<Base>`).
        indirect: bool,
        fields: fn() -> Vec<FieldDef>,
    },
}

impl FieldDef {
    pub fn field(name: &'static str, ty: &'static str) -> Self {
        FieldDef::Field(FieldSpec {
            name,
            ty,
            json: None,
            tag: "",
            db: "",
        })
    }

    pub fn embed<E: Fields>() -> Self {
        FieldDef::Embedded {
            type_name: E::TYPE_NAME,
            indirect: false,
            fields: E::fields,
        }
    }

    pub fn embed_indirect<E: Fields>() -> Self {
        FieldDef::Embedded {
            type_name: E::TYPE_NAME,
            indirect: true,
            fields: E::fields,
        }
    }

    pub fn json(mut self, json: &'static str) -> Self {
        if let FieldDef::Field(spec) = &mut self {
            spec.json = Some(json);
        }
        self
    }

    pub fn tag(mut self, tag: &'static str) -> Self {
        if let FieldDef::Field(spec) = &mut self {
            spec.tag = tag;
        }
        self
    }

    pub fn db(mut self, db: &'static str) -> Self {
        if let FieldDef::Field(spec) = &mut self {
            spec.db = db;
        }
        self
    }
}

/// A structure that exposes its fields for resolution. Embeddable building
/// blocks (e.g. a shared `id`/timestamps base) implement only this.
pub trait Fields {
    const TYPE_NAME: &'static str;

    fn fields() -> Vec<FieldDef>;
}

/// Direction of a relation: to_one (we hold the key to them) or to_many (they hold a key to us).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationKind {
    ToOne,
    ToMany,
}

/// A named relation that can be preloaded or joined.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    pub kind: RelationKind,
    /// Table of the related records.
    pub table: String,
    /// Our column used in the join (our FK for to_one; our PK for to_many).
    pub our_key: String,
    /// Their column used in the join (their PK for to_one; their FK for to_many).
    pub their_key: String,
}

impl Relation {
    pub fn to_one(name: &str, table: &str, our_key: &str, their_key: &str) -> Self {
        Relation {
            name: name.to_string(),
            kind: RelationKind::ToOne,
            table: table.to_string(),
            our_key: our_key.to_string(),
            their_key: their_key.to_string(),
        }
    }

    pub fn to_many(name: &str, table: &str, our_key: &str, their_key: &str) -> Self {
        Relation {
            name: name.to_string(),
            kind: RelationKind::ToMany,
            table: table.to_string(),
            our_key: our_key.to_string(),
            their_key: their_key.to_string(),
        }
    }
}

/// A record type served by the engine.
pub trait Resource: Fields + Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    const TABLE: &'static str;
    const PRIMARY_KEY: &'static str = "id";

    fn relations() -> Vec<Relation> {
        Vec::new()
    }
}
