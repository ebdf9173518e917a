//! Turns whitelisted request parameters into predicates.

use crate::engine::whitelist::Whitelist;
use crate::model::{FieldKind, ResolvedModel};
use crate::sql::{Filterable, Predicate};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Request parameter whose value fans out across every `search` column.
pub const SEARCH_PARAM: &str = "search";

const LIST_DELIMITER: char = ',';

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterKind {
    Eq,
    In,
    Fussy,
    Between,
    OrEq,
    OrIn,
    OrFussy,
    Search,
}

impl FilterKind {
    /// Accepts `eq`, `in`, `fussy`, `between`, `or_eq`/`orEq`, `or_in`/`orIn`,
    /// `or_fussy`/`orFussy` and `search`.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "eq" => FilterKind::Eq,
            "in" => FilterKind::In,
            "fussy" => FilterKind::Fussy,
            "between" => FilterKind::Between,
            "or_eq" | "orEq" => FilterKind::OrEq,
            "or_in" | "orIn" => FilterKind::OrIn,
            "or_fussy" | "orFussy" => FilterKind::OrFussy,
            "search" => FilterKind::Search,
            _ => return None,
        })
    }
}

/// Field names per filter kind, in registration order.
#[derive(Clone, Debug, Default)]
pub struct FilterSpec {
    fields: BTreeMap<FilterKind, Vec<String>>,
}

impl FilterSpec {
    pub fn new() -> Self {
        FilterSpec::default()
    }

    pub fn add<I, S>(&mut self, kind: FilterKind, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list = self.fields.entry(kind).or_default();
        for name in names {
            let name = name.into();
            if !list.contains(&name) {
                list.push(name);
            }
        }
    }

    pub fn fields(&self, kind: FilterKind) -> &[String] {
        self.fields.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.fields.values().all(Vec::is_empty)
    }
}

pub struct FilterResolver<'a> {
    spec: &'a FilterSpec,
    whitelist: &'a Whitelist,
    model: Option<&'a ResolvedModel>,
}

impl<'a> FilterResolver<'a> {
    pub fn new(spec: &'a FilterSpec, whitelist: &'a Whitelist) -> Self {
        FilterResolver {
            spec,
            whitelist,
            model: None,
        }
    }

    /// Typed values: parameters for numeric/boolean fields are parsed accordingly.
    pub fn with_model(mut self, model: &'a ResolvedModel) -> Self {
        self.model = Some(model);
        self
    }

    /// Append predicates in the order eq, in, fussy, between, or-group, search.
    pub fn apply<F: Filterable>(&self, params: &HashMap<String, String>, query: &mut F) {
        for field in self.candidates(FilterKind::Eq, params) {
            if let Some(value) = self.coerce(field, &params[field]) {
                query.and_where(Predicate::eq(field, value));
            }
        }
        for field in self.candidates(FilterKind::In, params) {
            if let Some(p) = self.in_predicate(field, &params[field]) {
                query.and_where(p);
            }
        }
        for field in self.candidates(FilterKind::Fussy, params) {
            query.and_where(Predicate::contains(field, params[field].trim()));
        }
        for field in self.candidates(FilterKind::Between, params) {
            if let Some(p) = self.between_predicate(field, &params[field]) {
                query.and_where(p);
            }
        }

        let mut group = Vec::new();
        for field in self.candidates(FilterKind::OrEq, params) {
            group.extend(self.coerce(field, &params[field]).map(|v| Predicate::eq(field, v)));
        }
        for field in self.candidates(FilterKind::OrIn, params) {
            group.extend(self.in_predicate(field, &params[field]));
        }
        for field in self.candidates(FilterKind::OrFussy, params) {
            group.push(Predicate::contains(field, params[field].trim()));
        }
        if !group.is_empty() {
            query.and_where(Predicate::Any(group));
        }

        if let Some(term) = params.get(SEARCH_PARAM).map(|s| s.trim()).filter(|s| !s.is_empty()) {
            let group: Vec<Predicate> = self
                .spec
                .fields(FilterKind::Search)
                .iter()
                .filter(|f| self.whitelist.allows(f))
                .map(|f| Predicate::contains(f, term))
                .collect();
            if !group.is_empty() {
                query.and_where(Predicate::Any(group));
            }
        }
    }

    /// Declared fields that are whitelisted and carry a non-empty parameter.
    fn candidates<'p>(&'p self, kind: FilterKind, params: &'p HashMap<String, String>) -> impl Iterator<Item = &'p str> {
        self.spec.fields(kind).iter().map(String::as_str).filter(move |f| {
            self.whitelist.allows(f) && params.get(*f).is_some_and(|v| !v.trim().is_empty())
        })
    }

    /// An empty list after splitting adds no predicate.
    fn in_predicate(&self, field: &str, raw: &str) -> Option<Predicate> {
        let values: Vec<Value> = raw
            .split(LIST_DELIMITER)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| self.coerce(field, s))
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(Predicate::is_in(field, values))
        }
    }

    /// `low,high`; a missing or unparsable bound degrades to `>=` / `<=`.
    fn between_predicate(&self, field: &str, raw: &str) -> Option<Predicate> {
        let (low, high) = raw.split_once(LIST_DELIMITER).unwrap_or((raw, ""));
        let bound = |s: &str| Some(s.trim()).filter(|s| !s.is_empty()).and_then(|s| self.coerce(field, s));
        match (bound(low), bound(high)) {
            (Some(low), Some(high)) => Some(Predicate::between(field, low, high)),
            (Some(low), None) => Some(Predicate::gte(field, low)),
            (None, Some(high)) => Some(Predicate::lte(field, high)),
            (None, None) => None,
        }
    }

    /// Typed value for the field's kind; `None` when a numeric or boolean field
    /// gets a value it cannot hold, so the filter is skipped.
    fn coerce(&self, field: &str, raw: &str) -> Option<Value> {
        let raw = raw.trim();
        let kind = self
            .model
            .and_then(|m| m.field_by_json(field))
            .map(|f| f.kind())
            .unwrap_or(FieldKind::Text);
        let typed = match kind {
            FieldKind::Integer => raw.parse::<i64>().map(Value::from).ok(),
            FieldKind::Float => raw.parse::<f64>().ok().and_then(|f| serde_json::Number::from_f64(f).map(Value::Number)),
            FieldKind::Bool => raw.parse::<bool>().map(Value::Bool).ok(),
            _ => return Some(Value::String(raw.to_string())),
        };
        if typed.is_none() {
            tracing::debug!(field, value = raw, "filter value does not fit the field type");
        }
        typed
    }
}
