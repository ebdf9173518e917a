//! Per-request configuration and state for one operation on a resource type.

use crate::engine::filter::{FilterKind, FilterSpec};
use crate::engine::hooks::{Flow, HookSet, Stage};
use crate::engine::whitelist::Whitelist;
use crate::error::AppError;
use crate::model::{ModelRegistry, ResolvedModel, Resource};
use crate::service::validation::{strip_unique, Rules};
use crate::sql::{Predicate, SelectQuery, TableRef};
use crate::store::Store;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub const DEFAULT_ITEM_KEY: &str = "id";
pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const DEFAULT_MAX_PAGE_SIZE: u64 = 100;

pub type ScanFuture = Pin<Box<dyn Future<Output = Result<Value, AppError>> + Send>>;
pub type ScanFn = Box<dyn FnOnce(Arc<dyn Store>, SelectQuery) -> ScanFuture + Send + Sync>;
pub type TransformFn<T> = Box<dyn Fn(&T) -> Value + Send + Sync>;

pub struct RequestContext<T: Resource> {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) meta: Option<Arc<ResolvedModel>>,

    /// Path parameters, e.g. `{"id": "7"}`.
    pub path_params: HashMap<String, String>,
    /// Query-string parameters.
    pub params: HashMap<String, String>,
    /// Submitted body fields, before validation.
    pub payload: Map<String, Value>,
    /// Record being built or the record fetched.
    pub model: T,
    /// Snapshot before an update.
    pub origin: Option<T>,
    /// Records fetched by `list`.
    pub records: Vec<T>,

    pub(crate) table: Option<TableRef>,
    pub(crate) item_key: String,
    pub(crate) rules: Rules,
    pub(crate) unique_fields: BTreeSet<String>,
    pub(crate) whitelist: Whitelist,
    pub(crate) selected: Whitelist,
    pub(crate) filters: FilterSpec,
    pub(crate) preloads: Vec<String>,
    pub(crate) joins: Vec<String>,
    pub(crate) scopes: Vec<Predicate>,
    pub(crate) hooks: HookSet<T>,
    pub(crate) scan: Option<ScanFn>,
    pub(crate) transformer: Option<TransformFn<T>>,
    pub(crate) permanent_delete: bool,
    pub(crate) page_size: u64,
    pub(crate) max_page_size: u64,
}

impl<T: Resource> RequestContext<T> {
    pub fn new(store: Arc<dyn Store>, models: &ModelRegistry) -> Self {
        let meta = models.get::<T>();
        if meta.is_none() {
            tracing::warn!(model = T::TYPE_NAME, "model is not registered");
        }
        RequestContext {
            store,
            meta,
            path_params: HashMap::new(),
            params: HashMap::new(),
            payload: Map::new(),
            model: T::default(),
            origin: None,
            records: Vec::new(),
            table: None,
            item_key: DEFAULT_ITEM_KEY.to_string(),
            rules: Rules::new(),
            unique_fields: BTreeSet::new(),
            whitelist: Whitelist::new(),
            selected: Whitelist::new(),
            filters: FilterSpec::new(),
            preloads: Vec::new(),
            joins: Vec::new(),
            scopes: Vec::new(),
            hooks: HookSet::default(),
            scan: None,
            transformer: None,
            permanent_delete: false,
            page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }

    pub fn with_path_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.path_params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Resolved metadata for `T`.
    pub fn resolved(&self) -> Result<Arc<ResolvedModel>, AppError> {
        self.meta
            .clone()
            .ok_or_else(|| AppError::Internal(format!("model {} is not registered", T::TYPE_NAME)))
    }

    /// Replace the default table. A non-identifier fragment binds each `?` to the next arg.
    pub fn set_table(&mut self, table: &str, args: Vec<Value>) -> &mut Self {
        self.table = Some(TableRef::with_args(table, args));
        self
    }

    pub fn set_item_key(&mut self, key: &str) -> &mut Self {
        self.item_key = key.to_string();
        self
    }

    /// Field -> rule string. A `unique` keyword is moved out of the rule into the
    /// set of fields checked against the store before writes.
    pub fn set_valid_rules<I, K, V>(&mut self, rules: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        for (field, rule) in rules {
            let field = field.into();
            let (rule, unique) = strip_unique(rule.as_ref());
            if unique {
                self.unique_fields.insert(field.clone());
            }
            self.rules.insert(field, rule);
        }
        self
    }

    pub fn add_col_white_list<I, S>(&mut self, cols: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist.extend(cols);
        self
    }

    pub fn add_selected_fields<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected.extend(fields);
        self
    }

    pub fn add_filter<I, S>(&mut self, kind: FilterKind, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.add(kind, fields);
        self
    }

    pub fn set_eq<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, fields: I) -> &mut Self {
        self.add_filter(FilterKind::Eq, fields)
    }

    pub fn set_in<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, fields: I) -> &mut Self {
        self.add_filter(FilterKind::In, fields)
    }

    pub fn set_fussy<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, fields: I) -> &mut Self {
        self.add_filter(FilterKind::Fussy, fields)
    }

    pub fn set_between<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, fields: I) -> &mut Self {
        self.add_filter(FilterKind::Between, fields)
    }

    pub fn set_or_eq<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, fields: I) -> &mut Self {
        self.add_filter(FilterKind::OrEq, fields)
    }

    pub fn set_or_in<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, fields: I) -> &mut Self {
        self.add_filter(FilterKind::OrIn, fields)
    }

    pub fn set_or_fussy<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, fields: I) -> &mut Self {
        self.add_filter(FilterKind::OrFussy, fields)
    }

    pub fn set_search<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, fields: I) -> &mut Self {
        self.add_filter(FilterKind::Search, fields)
    }

    pub fn set_preloads<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, names: I) -> &mut Self {
        self.preloads.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn set_joins<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, names: I) -> &mut Self {
        self.joins.extend(names.into_iter().map(Into::into));
        self
    }

    /// Extra predicate applied to every read and to the lookup before update/delete.
    pub fn add_scope(&mut self, predicate: Predicate) -> &mut Self {
        self.scopes.push(predicate);
        self
    }

    pub fn before_decode_hook<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut(&mut RequestContext<T>) -> Flow + Send + Sync + 'static,
    {
        self.hooks.push(Stage::BeforeDecode, Box::new(hook));
        self
    }

    pub fn before_execute_hook<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut(&mut RequestContext<T>) -> Flow + Send + Sync + 'static,
    {
        self.hooks.push(Stage::BeforeExecute, Box::new(hook));
        self
    }

    pub fn executed_hook<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut(&mut RequestContext<T>) -> Flow + Send + Sync + 'static,
    {
        self.hooks.push(Stage::AfterExecute, Box::new(hook));
        self
    }

    /// Replace the default fetch and serialization of `get`/`list`. The callback
    /// receives the store and the fully scoped query. On `get` that query already
    /// filters by the path id when one was given, so the callback should not add it again.
    pub fn set_scan<F, Fut>(&mut self, scan: F) -> &mut Self
    where
        F: FnOnce(Arc<dyn Store>, SelectQuery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, AppError>> + Send + 'static,
    {
        let boxed: ScanFn = Box::new(move |store: Arc<dyn Store>, query: SelectQuery| -> ScanFuture {
            Box::pin(scan(store, query))
        });
        self.scan = Some(boxed);
        self
    }

    pub fn set_transformer<F>(&mut self, transform: F) -> &mut Self
    where
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        self.transformer = Some(Box::new(transform));
        self
    }

    /// Delete removes the row even when the model is soft-deletable.
    pub fn permanently_delete(&mut self) -> &mut Self {
        self.permanent_delete = true;
        self
    }

    pub fn set_page_size(&mut self, default: u64, max: u64) -> &mut Self {
        self.max_page_size = max.max(1);
        self.page_size = default.clamp(1, self.max_page_size);
        self
    }

    /// Register every field tagged `list:<kind>` under that filter kind and in the whitelist.
    pub fn apply_field_tags(&mut self) -> &mut Self {
        let Some(meta) = self.meta.clone() else {
            return self;
        };
        for field in meta.ordered_fields() {
            let kinds = field.tag.values("list");
            if kinds.is_empty() {
                continue;
            }
            for kind in kinds {
                match FilterKind::parse(kind) {
                    Some(kind) => self.filters.add(kind, [field.json_name.as_str()]),
                    None => tracing::warn!(field = %field.json_name, kind, "unknown list filter in field tag"),
                }
            }
            self.whitelist.extend([field.json_name.as_str()]);
        }
        self
    }

    /// Primary key from the path; 0 when absent or not an unsigned integer.
    pub fn get_param_id(&self) -> u64 {
        self.path_params
            .get(&self.item_key)
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0)
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &str> {
        self.unique_fields.iter().map(String::as_str)
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    pub fn filters(&self) -> &FilterSpec {
        &self.filters
    }

    /// Runs one stage's hooks in registration order; stops at the first abort.
    pub(crate) fn run_hooks(&mut self, stage: Stage) -> Flow {
        let mut hooks = self.hooks.take(stage);
        let mut flow = Flow::Continue;
        for hook in hooks.iter_mut() {
            if let Flow::Abort(reply) = hook(self) {
                tracing::info!(model = T::TYPE_NAME, %stage, status = %reply.status, "operation aborted by hook");
                flow = Flow::Abort(reply);
                break;
            }
        }
        self.hooks.restore(stage, hooks);
        flow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldDef, Fields, ModelCollection};
    use crate::response::Reply;
    use crate::store::MemoryStore;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Note {
        id: u64,
        title: String,
        state: String,
    }

    impl Fields for Note {
        const TYPE_NAME: &'static str = "Note";

        fn fields() -> Vec<FieldDef> {
            vec![
                FieldDef::field("id", "u64"),
                FieldDef::field("title", "String").tag("list:fussy,search"),
                FieldDef::field("state", "String").tag("list:in"),
            ]
        }
    }

    impl Resource for Note {
        const TABLE: &'static str = "notes";
    }

    fn ctx() -> RequestContext<Note> {
        let models = ModelCollection::new().register::<Note>().resolve_all();
        RequestContext::new(Arc::new(MemoryStore::new()), &models)
    }

    #[test]
    fn param_id_fails_safe() {
        assert_eq!(ctx().with_path_param("id", "42").get_param_id(), 42);
        assert_eq!(ctx().with_path_param("id", "abc").get_param_id(), 0);
        assert_eq!(ctx().with_path_param("id", "-3").get_param_id(), 0);
        assert_eq!(ctx().get_param_id(), 0);

        let mut c = ctx().with_path_param("note_id", "9");
        c.set_item_key("note_id");
        assert_eq!(c.get_param_id(), 9);
    }

    #[test]
    fn unique_marker_moves_out_of_rules() {
        let mut c = ctx();
        c.set_valid_rules([("title", "required,unique"), ("state", "oneof=a b")]);
        assert_eq!(c.unique_fields().collect::<Vec<_>>(), vec!["title"]);
        assert_eq!(c.rules()["title"], "required");
        assert_eq!(c.rules()["state"], "oneof=a b");
    }

    #[test]
    fn field_tags_register_filters_and_whitelist() {
        let mut c = ctx();
        c.apply_field_tags();
        assert!(c.whitelist().allows("title"));
        assert!(c.whitelist().allows("state"));
        assert!(!c.whitelist().allows("id"));
        assert_eq!(c.filters().fields(FilterKind::Fussy), ["title".to_string()]);
        assert_eq!(c.filters().fields(FilterKind::Search), ["title".to_string()]);
        assert_eq!(c.filters().fields(FilterKind::In), ["state".to_string()]);
    }

    #[test]
    fn hooks_run_in_order_and_stop_at_abort() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut c = ctx();
        let first = calls.clone();
        let third = calls.clone();
        c.before_execute_hook(move |ctx| {
            assert_eq!(first.fetch_add(1, Ordering::SeqCst), 0);
            ctx.model.title = "touched".into();
            Flow::Continue
        })
        .before_execute_hook(|_| Flow::abort(Reply::no_content()))
        .before_execute_hook(move |_| {
            third.fetch_add(1, Ordering::SeqCst);
            Flow::Continue
        });

        assert_eq!(c.run_hooks(Stage::BeforeExecute), Flow::Abort(Reply::no_content()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.model.title, "touched");
        assert_eq!(c.hooks.len(Stage::BeforeExecute), 3);
    }
}
