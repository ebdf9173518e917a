//! Operation lifecycle: hooks, validation, uniqueness and execution against the store.

use crate::engine::context::RequestContext;
use crate::engine::decode::{coerce_payload, decode_row, merge_into, now_for, to_object};
use crate::engine::filter::FilterResolver;
use crate::engine::hooks::{Flow, Stage};
use crate::error::{AppError, FieldErrors};
use crate::model::{ResolvedModel, Resource};
use crate::response::{page_body, Pagination, Reply};
use crate::service::validation::RequestValidator;
use crate::sql::{
    DeleteMode, Filterable, Predicate, SelectQuery, SortOrder, TableRef, Target, SOFT_DELETE_COLUMN,
};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

pub const PAGE_PARAM: &str = "page";
pub const PAGE_SIZE_PARAM: &str = "page_size";
pub const SORT_BY_PARAM: &str = "sort_by";
pub const ORDER_PARAM: &str = "order";

const CREATED_AT: &str = "created_at";
const UPDATED_AT: &str = "updated_at";

macro_rules! run_stage {
    ($ctx:expr, $stage:expr) => {
        if let Flow::Abort(reply) = $ctx.run_hooks($stage) {
            return Ok(reply);
        }
    };
}

fn not_found(meta: &ResolvedModel, id: u64) -> AppError {
    AppError::NotFound(format!("{} {}", meta.name, id))
}

fn invalid_payload(e: serde_json::Error) -> AppError {
    AppError::BadRequest(format!("invalid payload: {}", e))
}

impl<T: Resource> RequestContext<T> {
    fn target(&self, meta: &ResolvedModel) -> Target {
        let table = self.table.clone().unwrap_or_else(|| TableRef::new(&meta.table));
        Target::for_model(meta, table)
    }

    /// Table, soft-delete filter and scopes.
    fn base_query(&self, meta: &ResolvedModel, include_deleted: bool) -> SelectQuery {
        let mut query = SelectQuery::new(self.target(meta));
        if meta.soft_delete() && !include_deleted {
            query.and_where(Predicate::is_null(SOFT_DELETE_COLUMN));
        }
        for scope in &self.scopes {
            query.and_where(scope.clone());
        }
        query
    }

    /// Preloads, joins and projection for reads.
    fn read_query(&self, meta: &ResolvedModel) -> SelectQuery {
        let mut query = self.base_query(meta, false);
        for (names, out) in [(&self.preloads, &mut query.preloads), (&self.joins, &mut query.joins)] {
            for name in names {
                match meta.relation(name) {
                    Some(rel) => out.push(rel.clone()),
                    None => tracing::warn!(model = %meta.name, relation = %name, "unknown relation ignored"),
                }
            }
        }
        if !self.selected.is_empty() {
            query.columns = meta
                .columns()
                .filter(|f| self.selected.allows(&f.json_name))
                .map(|f| f.json_name.clone())
                .collect();
        }
        query
    }

    fn by_id(meta: &ResolvedModel, query: &mut SelectQuery, id: u64) {
        query.and_where(Predicate::eq(&meta.primary_key, Value::from(id)));
    }

    fn render(&self, record: &T) -> Result<Value, AppError> {
        match &self.transformer {
            Some(transform) => Ok(transform(record)),
            None => serde_json::to_value(record).map_err(|e| AppError::Internal(format!("encode {}: {}", T::TYPE_NAME, e))),
        }
    }

    /// Columns to insert. Unsubmitted nulls and untouched defaults are left to the database;
    /// `created_at`/`updated_at` are stamped when not submitted.
    fn insert_row(&self, meta: &ResolvedModel) -> Result<Map<String, Value>, AppError> {
        let record = to_object(&self.model)?;
        let defaults = to_object(&T::default())?;
        let mut row = Map::new();
        for field in meta.columns() {
            let name = field.json_name.as_str();
            let Some(value) = record.get(name) else {
                continue;
            };
            if name == meta.primary_key && (value.is_null() || value.as_u64() == Some(0)) {
                continue;
            }
            let submitted = self.payload.contains_key(name);
            let untouched = value.is_null() || defaults.get(name) == Some(value);
            if !submitted && untouched {
                if name == CREATED_AT || name == UPDATED_AT {
                    row.insert(name.to_string(), now_for(field));
                    continue;
                }
                if value.is_null() || field.default_value.is_some() {
                    continue;
                }
            }
            row.insert(name.to_string(), value.clone());
        }
        Ok(row)
    }

    /// Changed columns between origin and model, plus `updated_at`.
    fn changed_columns(&self, meta: &ResolvedModel) -> Result<Map<String, Value>, AppError> {
        let current = to_object(&self.model)?;
        let before = match &self.origin {
            Some(origin) => to_object(origin)?,
            None => Map::new(),
        };
        let mut changes = Map::new();
        for field in meta.columns() {
            let name = field.json_name.as_str();
            if name == meta.primary_key {
                continue;
            }
            if let Some(value) = current.get(name) {
                if before.get(name) != Some(value) {
                    changes.insert(name.to_string(), value.clone());
                }
            }
        }
        if let Some(field) = meta.field_by_json(UPDATED_AT).filter(|f| f.column) {
            changes.insert(UPDATED_AT.to_string(), now_for(field));
        }
        Ok(changes)
    }

    /// Fails with every unique field in the payload that another row already holds.
    async fn check_unique(&mut self, meta: &ResolvedModel, target: &Target, exclude: Option<u64>) -> Result<(), AppError> {
        let mut fields: BTreeSet<String> = self.unique_fields.clone();
        fields.extend(meta.unique_fields().into_iter().map(String::from));
        let checks: Vec<(String, Value)> = fields
            .into_iter()
            .filter_map(|f| {
                let value = self.payload.get(&f).filter(|v| !v.is_null())?.clone();
                Some((f, value))
            })
            .collect();

        let store = self.store.clone();
        let mut errors = FieldErrors::new();
        for (field, value) in checks {
            let mut query = SelectQuery::new(target.clone());
            if meta.soft_delete() {
                query.and_where(Predicate::is_null(SOFT_DELETE_COLUMN));
            }
            query.and_where(Predicate::eq(&field, value));
            if let Some(id) = exclude {
                query.and_where(Predicate::not_eq(&meta.primary_key, Value::from(id)));
            }
            if store.exists(&query).await? {
                errors.add(field.clone(), format!("{} has already been taken", field));
            }
        }
        errors.into_result()
    }

    /// Fetch one record by the path id. A scan override replaces the fetch,
    /// the transform and the after-execute hooks.
    pub async fn get(&mut self) -> Result<Reply, AppError> {
        let meta = self.resolved()?;
        let id = self.get_param_id();
        run_stage!(self, Stage::BeforeExecute);

        let mut query = self.read_query(&meta);
        if let Some(scan) = self.scan.take() {
            if id > 0 {
                Self::by_id(&meta, &mut query, id);
            }
            let body = scan(self.store.clone(), query).await?;
            return Ok(Reply::ok(body));
        }

        if id == 0 {
            return Err(not_found(&meta, id));
        }
        Self::by_id(&meta, &mut query, id);
        let store = self.store.clone();
        let row = store.fetch_one(&query).await?.ok_or_else(|| not_found(&meta, id))?;
        self.model = decode_row(row)?;

        run_stage!(self, Stage::AfterExecute);
        Ok(Reply::ok(self.render(&self.model)?))
    }

    /// Filtered, sorted, paginated list.
    pub async fn list(&mut self) -> Result<Reply, AppError> {
        let meta = self.resolved()?;
        run_stage!(self, Stage::BeforeExecute);

        let mut query = self.read_query(&meta);
        FilterResolver::new(&self.filters, &self.whitelist)
            .with_model(&meta)
            .apply(&self.params, &mut query);

        if let Some(col) = self.params.get(SORT_BY_PARAM).map(|s| s.trim()).filter(|s| !s.is_empty()) {
            let sortable = self.whitelist.allows(col) && meta.field_by_json(col).is_some_and(|f| f.column);
            if sortable {
                let order = self.params.get(ORDER_PARAM).map(|s| SortOrder::parse(s.trim())).unwrap_or(SortOrder::Asc);
                query.order_by(col, order);
            } else {
                tracing::debug!(model = %meta.name, sort_by = col, "sort column not whitelisted");
            }
        }

        let page = self
            .params
            .get(PAGE_PARAM)
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|&p| p > 0)
            .unwrap_or(1);
        let per_page = self
            .params
            .get(PAGE_SIZE_PARAM)
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(self.page_size)
            .min(self.max_page_size);
        query.paginate(per_page, (page - 1).saturating_mul(per_page));

        if let Some(scan) = self.scan.take() {
            let body = scan(self.store.clone(), query).await?;
            return Ok(Reply::ok(body));
        }

        let store = self.store.clone();
        let total = store.count(&query.unpaged()).await?;
        let rows = store.fetch_all(&query).await?;
        self.records = rows.into_iter().map(decode_row).collect::<Result<Vec<T>, _>>()?;

        run_stage!(self, Stage::AfterExecute);
        let data = self
            .records
            .iter()
            .map(|r| self.render(r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Reply::ok(page_body(data, Pagination::new(total, per_page, page))?))
    }

    /// Validate the payload, check uniqueness, insert.
    pub async fn create(&mut self) -> Result<Reply, AppError> {
        let meta = self.resolved()?;
        coerce_payload(&meta, &mut self.payload)?;
        run_stage!(self, Stage::BeforeDecode);

        RequestValidator::validate(&self.payload, &self.rules)?;
        let target = self.target(&meta);
        self.check_unique(&meta, &target, None).await?;
        self.model = merge_into(&T::default(), &self.payload).map_err(invalid_payload)?;
        run_stage!(self, Stage::BeforeExecute);

        let row = self.insert_row(&meta)?;
        let store = self.store.clone();
        let stored = store.insert(&target, &row).await?;
        self.model = decode_row(stored)?;
        tracing::info!(model = %meta.name, "record created");

        run_stage!(self, Stage::AfterExecute);
        Ok(Reply::created(self.render(&self.model)?))
    }

    /// Overlay the payload on the stored record and write the changed columns.
    pub async fn update(&mut self) -> Result<Reply, AppError> {
        let meta = self.resolved()?;
        let id = self.get_param_id();
        if id == 0 {
            return Err(not_found(&meta, id));
        }
        coerce_payload(&meta, &mut self.payload)?;

        let target = self.target(&meta);
        let mut lookup = self.base_query(&meta, false);
        Self::by_id(&meta, &mut lookup, id);
        let store = self.store.clone();
        let row = store.fetch_one(&lookup).await?.ok_or_else(|| not_found(&meta, id))?;
        self.origin = Some(decode_row(row)?);
        run_stage!(self, Stage::BeforeDecode);

        RequestValidator::validate_partial(&self.payload, &self.rules)?;
        self.check_unique(&meta, &target, Some(id)).await?;
        let merged = match &self.origin {
            Some(origin) => merge_into(origin, &self.payload),
            None => merge_into(&T::default(), &self.payload),
        };
        self.model = merged.map_err(invalid_payload)?;
        run_stage!(self, Stage::BeforeExecute);

        let changes = self.changed_columns(&meta)?;
        let stored = store
            .update(&target, id, &changes)
            .await?
            .ok_or_else(|| not_found(&meta, id))?;
        self.model = decode_row(stored)?;
        tracing::info!(model = %meta.name, id, columns = changes.len(), "record updated");

        run_stage!(self, Stage::AfterExecute);
        Ok(Reply::ok(self.render(&self.model)?))
    }

    /// Soft delete when the model has `deleted_at`, unless `permanently_delete` was set.
    pub async fn delete(&mut self) -> Result<Reply, AppError> {
        let meta = self.resolved()?;
        let id = self.get_param_id();
        if id == 0 {
            return Err(not_found(&meta, id));
        }
        run_stage!(self, Stage::BeforeExecute);

        let permanent = self.permanent_delete || !meta.soft_delete();
        let mut lookup = self.base_query(&meta, permanent);
        Self::by_id(&meta, &mut lookup, id);
        let store = self.store.clone();
        let row = store.fetch_one(&lookup).await?.ok_or_else(|| not_found(&meta, id))?;
        self.model = decode_row(row)?;

        let mode = if permanent { DeleteMode::Permanent } else { DeleteMode::Soft };
        if !store.delete(&self.target(&meta), id, mode).await? {
            return Err(not_found(&meta, id));
        }
        tracing::info!(model = %meta.name, id, ?mode, "record deleted");

        run_stage!(self, Stage::AfterExecute);
        Ok(Reply::no_content())
    }

    /// Clear `deleted_at` on a soft-deleted record that is within the context's scopes.
    pub async fn restore(&mut self) -> Result<Reply, AppError> {
        let meta = self.resolved()?;
        if !meta.soft_delete() {
            return Err(AppError::BadRequest(format!("{} does not support restore", meta.name)));
        }
        let id = self.get_param_id();
        if id == 0 {
            return Err(not_found(&meta, id));
        }
        run_stage!(self, Stage::BeforeExecute);

        let target = self.target(&meta);
        let store = self.store.clone();
        let mut deleted = self.base_query(&meta, true);
        Self::by_id(&meta, &mut deleted, id);
        deleted.and_where(Predicate::is_not_null(SOFT_DELETE_COLUMN));
        if !store.exists(&deleted).await? {
            return Err(not_found(&meta, id));
        }
        if !store.delete(&target, id, DeleteMode::Restore).await? {
            return Err(not_found(&meta, id));
        }
        let mut lookup = self.base_query(&meta, false);
        Self::by_id(&meta, &mut lookup, id);
        let row = store.fetch_one(&lookup).await?.ok_or_else(|| not_found(&meta, id))?;
        self.model = decode_row(row)?;
        tracing::info!(model = %meta.name, id, "record restored");

        run_stage!(self, Stage::AfterExecute);
        Ok(Reply::ok(self.render(&self.model)?))
    }
}
