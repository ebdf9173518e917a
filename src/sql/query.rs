//! Structured queries handed to a [`crate::store::Store`]. Identifiers come from
//! model metadata or application code; request values only ever travel as
//! predicate operands.

use crate::model::{Relation, ResolvedModel};
use serde_json::Value;
use std::collections::HashMap;

pub const SOFT_DELETE_COLUMN: &str = "deleted_at";

/// Table expression. A plain identifier (`users`, `app.users`) is quoted; any
/// other fragment is used verbatim with each `?` bound to the next arg.
#[derive(Clone, Debug, PartialEq)]
pub struct TableRef {
    pub name: String,
    pub args: Vec<Value>,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        TableRef {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(name: impl Into<String>, args: Vec<Value>) -> Self {
        TableRef {
            name: name.into(),
            args,
        }
    }
}

/// Where an operation runs: table, primary key column and per-column casts.
#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    pub table: TableRef,
    pub primary_key: String,
    pub casts: HashMap<String, String>,
}

impl Target {
    pub fn new(table: TableRef, primary_key: impl Into<String>) -> Self {
        Target {
            table,
            primary_key: primary_key.into(),
            casts: HashMap::new(),
        }
    }

    pub fn for_model(model: &ResolvedModel, table: TableRef) -> Self {
        Target {
            table,
            primary_key: model.primary_key.clone(),
            casts: model.casts(),
        }
    }

    pub fn cast(&self, column: &str) -> Option<&str> {
        self.casts.get(column).map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Eq { column: String, value: Value },
    NotEq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    /// Substring match; the needle is escaped when rendered.
    Contains { column: String, needle: String },
    Between { column: String, low: Value, high: Value },
    Gte { column: String, value: Value },
    Lte { column: String, value: Value },
    IsNull { column: String },
    IsNotNull { column: String },
    /// OR group, AND-ed with the rest of the chain as one sub-condition.
    Any(Vec<Predicate>),
    /// Application-supplied SQL with `?` placeholders. Not evaluated by the in-memory store.
    Raw { sql: String, args: Vec<Value> },
}

impl Predicate {
    pub fn eq(column: &str, value: Value) -> Self {
        Predicate::Eq {
            column: column.to_string(),
            value,
        }
    }

    pub fn not_eq(column: &str, value: Value) -> Self {
        Predicate::NotEq {
            column: column.to_string(),
            value,
        }
    }

    pub fn is_in(column: &str, values: Vec<Value>) -> Self {
        Predicate::In {
            column: column.to_string(),
            values,
        }
    }

    pub fn contains(column: &str, needle: &str) -> Self {
        Predicate::Contains {
            column: column.to_string(),
            needle: needle.to_string(),
        }
    }

    pub fn between(column: &str, low: Value, high: Value) -> Self {
        Predicate::Between {
            column: column.to_string(),
            low,
            high,
        }
    }

    pub fn gte(column: &str, value: Value) -> Self {
        Predicate::Gte {
            column: column.to_string(),
            value,
        }
    }

    pub fn lte(column: &str, value: Value) -> Self {
        Predicate::Lte {
            column: column.to_string(),
            value,
        }
    }

    pub fn is_null(column: &str) -> Self {
        Predicate::IsNull {
            column: column.to_string(),
        }
    }

    pub fn is_not_null(column: &str) -> Self {
        Predicate::IsNotNull {
            column: column.to_string(),
        }
    }

    pub fn raw(sql: &str, args: Vec<Value>) -> Self {
        Predicate::Raw {
            sql: sql.to_string(),
            args,
        }
    }
}

/// The capability the filter resolver needs: append one predicate, AND-ed with the rest.
pub trait Filterable {
    fn and_where(&mut self, predicate: Predicate);
}

impl Filterable for Vec<Predicate> {
    fn and_where(&mut self, predicate: Predicate) {
        self.push(predicate);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    /// `desc` (any case) is descending; everything else ascending.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("desc") {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectQuery {
    pub target: Target,
    /// Projection; empty selects every column.
    pub columns: Vec<String>,
    pub predicates: Vec<Predicate>,
    pub preloads: Vec<Relation>,
    pub joins: Vec<Relation>,
    pub order: Option<(String, SortOrder)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectQuery {
    pub fn new(target: Target) -> Self {
        SelectQuery {
            target,
            columns: Vec::new(),
            predicates: Vec::new(),
            preloads: Vec::new(),
            joins: Vec::new(),
            order: None,
            limit: None,
            offset: None,
        }
    }

    pub fn order_by(&mut self, column: &str, order: SortOrder) -> &mut Self {
        self.order = Some((column.to_string(), order));
        self
    }

    pub fn paginate(&mut self, limit: u64, offset: u64) -> &mut Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// Same query without projection, ordering or pagination; used for counts.
    pub fn unpaged(&self) -> SelectQuery {
        SelectQuery {
            target: self.target.clone(),
            columns: Vec::new(),
            predicates: self.predicates.clone(),
            preloads: Vec::new(),
            joins: self.joins.clone(),
            order: None,
            limit: None,
            offset: None,
        }
    }
}

impl Filterable for SelectQuery {
    fn and_where(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteMode {
    /// Set `deleted_at`; only rows not already deleted.
    Soft,
    /// Remove the row.
    Permanent,
    /// Clear `deleted_at`; only rows currently deleted.
    Restore,
}
