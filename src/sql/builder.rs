//! Renders structured queries into parameterized PostgreSQL.

use crate::model::RelationKind;
use crate::sql::query::{DeleteMode, Predicate, SelectQuery, TableRef, Target, SOFT_DELETE_COLUMN};
use serde_json::{Map, Value};

const MAIN_ALIAS: &str = "main";

/// Quote identifier for PostgreSQL (safe: only from model metadata).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Schema-qualified, quoted table name (`app.users` -> `"app"."users"`).
fn qualified(name: &str) -> String {
    name.split('.').map(quoted).collect::<Vec<_>>().join(".")
}

/// `users` or `app.users`: letters, digits and underscores, not starting with a digit.
fn is_plain_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|p| {
            let mut chars = p.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Escape `%`, `_` and the escape character itself for `LIKE ... ESCAPE '\'`.
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    fn placeholder(&mut self, v: Value, cast: Option<&str>) -> String {
        let n = self.push_param(v);
        match cast {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }

    /// Replace each `?` in a trusted fragment with the next bound arg.
    fn bind_fragment(&mut self, fragment: &str, args: &[Value]) -> String {
        let mut out = String::with_capacity(fragment.len());
        let mut args = args.iter();
        for c in fragment.chars() {
            if c == '?' {
                match args.next() {
                    Some(v) => {
                        let n = self.push_param(v.clone());
                        out.push_str(&format!("${}", n));
                    }
                    None => out.push(c),
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    fn table(&mut self, table: &TableRef) -> String {
        if is_plain_identifier(&table.name) {
            qualified(&table.name)
        } else {
            self.bind_fragment(&table.name, &table.args)
        }
    }
}

fn column_ref(alias: Option<&str>, column: &str) -> String {
    match alias {
        Some(a) => format!("{}.{}", a, quoted(column)),
        None => quoted(column),
    }
}

/// Render one predicate; `None` when it contributes nothing (empty OR group).
fn render_predicate(q: &mut QueryBuf, target: &Target, alias: Option<&str>, p: &Predicate) -> Option<String> {
    Some(match p {
        Predicate::Eq { column, value } => {
            let ph = q.placeholder(value.clone(), target.cast(column));
            format!("{} = {}", column_ref(alias, column), ph)
        }
        Predicate::NotEq { column, value } => {
            let ph = q.placeholder(value.clone(), target.cast(column));
            format!("{} <> {}", column_ref(alias, column), ph)
        }
        Predicate::In { column, values } => {
            if values.is_empty() {
                return Some("1 = 0".to_string());
            }
            let phs: Vec<String> = values
                .iter()
                .map(|v| q.placeholder(v.clone(), target.cast(column)))
                .collect();
            format!("{} IN ({})", column_ref(alias, column), phs.join(", "))
        }
        Predicate::Contains { column, needle } => {
            let ph = q.placeholder(Value::String(format!("%{}%", escape_like(needle))), None);
            let col = match target.cast(column) {
                Some("text") => column_ref(alias, column),
                _ => format!("CAST({} AS text)", column_ref(alias, column)),
            };
            format!("{} LIKE {} ESCAPE '\\'", col, ph)
        }
        Predicate::Between { column, low, high } => {
            let lo = q.placeholder(low.clone(), target.cast(column));
            let hi = q.placeholder(high.clone(), target.cast(column));
            format!("{} BETWEEN {} AND {}", column_ref(alias, column), lo, hi)
        }
        Predicate::Gte { column, value } => {
            let ph = q.placeholder(value.clone(), target.cast(column));
            format!("{} >= {}", column_ref(alias, column), ph)
        }
        Predicate::Lte { column, value } => {
            let ph = q.placeholder(value.clone(), target.cast(column));
            format!("{} <= {}", column_ref(alias, column), ph)
        }
        Predicate::IsNull { column } => format!("{} IS NULL", column_ref(alias, column)),
        Predicate::IsNotNull { column } => format!("{} IS NOT NULL", column_ref(alias, column)),
        Predicate::Any(group) => {
            let parts: Vec<String> = group
                .iter()
                .filter_map(|g| render_predicate(q, target, alias, g))
                .collect();
            if parts.is_empty() {
                return None;
            }
            format!("({})", parts.join(" OR "))
        }
        Predicate::Raw { sql, args } => format!("({})", q.bind_fragment(sql, args)),
    })
}

fn where_clause(q: &mut QueryBuf, target: &Target, alias: Option<&str>, predicates: &[Predicate]) -> String {
    let parts: Vec<String> = predicates
        .iter()
        .filter_map(|p| render_predicate(q, target, alias, p))
        .collect();
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

fn join_clauses(query: &SelectQuery) -> (Vec<String>, Vec<String>) {
    let mut selects = Vec::new();
    let mut joins = Vec::new();
    for rel in &query.joins {
        if rel.kind != RelationKind::ToOne {
            tracing::warn!(relation = %rel.name, "join skipped: only to-one relations can be joined");
            continue;
        }
        let alias = quoted(&rel.name);
        joins.push(format!(
            " LEFT JOIN {} AS {} ON {}.{} = {}.{}",
            qualified(&rel.table),
            alias,
            alias,
            quoted(&rel.their_key),
            MAIN_ALIAS,
            quoted(&rel.our_key)
        ));
        selects.push(format!(
            "CASE WHEN {}.{} IS NULL THEN NULL ELSE row_to_json({}) END AS {}",
            alias,
            quoted(&rel.their_key),
            alias,
            alias
        ));
    }
    (selects, joins)
}

/// SELECT with projection, preload subqueries, to-one joins, predicates, order and pagination.
pub fn select(query: &SelectQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = q.table(&query.target.table);

    let mut select_parts: Vec<String> = if query.columns.is_empty() {
        vec![format!("{}.*", MAIN_ALIAS)]
    } else {
        query.columns.iter().map(|c| column_ref(Some(MAIN_ALIAS), c)).collect()
    };

    for rel in &query.preloads {
        let sub_from = format!(
            "{} WHERE {} = {}.{}",
            qualified(&rel.table),
            quoted(&rel.their_key),
            MAIN_ALIAS,
            quoted(&rel.our_key)
        );
        let subquery = match rel.kind {
            RelationKind::ToOne => format!(
                "(SELECT row_to_json(sub) FROM (SELECT * FROM {} LIMIT 1) sub)",
                sub_from
            ),
            RelationKind::ToMany => format!(
                "(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM (SELECT * FROM {}) sub)",
                sub_from
            ),
        };
        select_parts.push(format!("{} AS {}", subquery, quoted(&rel.name)));
    }

    let (join_selects, joins) = join_clauses(query);
    select_parts.extend(join_selects);

    let where_sql = where_clause(&mut q, &query.target, Some(MAIN_ALIAS), &query.predicates);
    let (order_col, order) = query
        .order
        .clone()
        .unwrap_or_else(|| (query.target.primary_key.clone(), crate::sql::SortOrder::Asc));
    let order_clause = format!(" ORDER BY {} {}", column_ref(Some(MAIN_ALIAS), &order_col), order.as_sql());
    let limit_clause = query.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = query.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();

    q.sql = format!(
        "SELECT {} FROM {} {}{}{}{}{}{}",
        select_parts.join(", "),
        table,
        MAIN_ALIAS,
        joins.join(""),
        where_sql,
        order_clause,
        limit_clause,
        offset_clause
    );
    q
}

/// SELECT COUNT(*) over the same table, joins and predicates.
pub fn count(query: &SelectQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = q.table(&query.target.table);
    let (_, joins) = join_clauses(query);
    let where_sql = where_clause(&mut q, &query.target, Some(MAIN_ALIAS), &query.predicates);
    q.sql = format!("SELECT COUNT(*) FROM {} {}{}{}", table, MAIN_ALIAS, joins.join(""), where_sql);
    q
}

/// SELECT EXISTS(...) for uniqueness checks.
pub fn exists(query: &SelectQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = q.table(&query.target.table);
    let where_sql = where_clause(&mut q, &query.target, Some(MAIN_ALIAS), &query.predicates);
    q.sql = format!("SELECT EXISTS(SELECT 1 FROM {} {}{})", table, MAIN_ALIAS, where_sql);
    q
}

/// INSERT the given columns; columns absent from `row` take their database default.
pub fn insert(target: &Target, row: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = q.table(&target.table);
    if row.is_empty() {
        q.sql = format!("INSERT INTO {} DEFAULT VALUES RETURNING *", table);
        return q;
    }
    let mut cols = Vec::with_capacity(row.len());
    let mut placeholders = Vec::with_capacity(row.len());
    for (name, val) in row {
        cols.push(quoted(name));
        placeholders.push(q.placeholder(val.clone(), target.cast(name)));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        table,
        cols.join(", "),
        placeholders.join(", ")
    );
    q
}

/// UPDATE by id: SET only the given columns (never the primary key).
pub fn update(target: &Target, id: u64, changes: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = q.table(&target.table);
    let pk = &target.primary_key;
    let mut sets = Vec::new();
    for (k, v) in changes {
        if k == pk {
            continue;
        }
        let rhs = q.placeholder(v.clone(), target.cast(k));
        sets.push(format!("{} = {}", quoted(k), rhs));
    }
    let id_ph = q.placeholder(Value::from(id), target.cast(pk));
    if sets.is_empty() {
        q.sql = format!("SELECT * FROM {} WHERE {} = {}", table, quoted(pk), id_ph);
        return q;
    }
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {} RETURNING *",
        table,
        sets.join(", "),
        quoted(pk),
        id_ph
    );
    q
}

/// DELETE by id, or soft delete / restore through `deleted_at`.
pub fn delete(target: &Target, id: u64, mode: DeleteMode) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = q.table(&target.table);
    let pk = quoted(&target.primary_key);
    let id_ph = q.placeholder(Value::from(id), target.cast(&target.primary_key));
    let deleted_at = quoted(SOFT_DELETE_COLUMN);
    q.sql = match mode {
        DeleteMode::Permanent => format!("DELETE FROM {} WHERE {} = {}", table, pk, id_ph),
        DeleteMode::Soft => format!(
            "UPDATE {} SET {} = NOW() WHERE {} = {} AND {} IS NULL",
            table, deleted_at, pk, id_ph, deleted_at
        ),
        DeleteMode::Restore => format!(
            "UPDATE {} SET {} = NULL WHERE {} = {} AND {} IS NOT NULL",
            table, deleted_at, pk, id_ph, deleted_at
        ),
    };
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Relation;
    use crate::sql::SortOrder;
    use serde_json::json;

    fn target() -> Target {
        let mut t = Target::new(TableRef::new("users"), "id");
        t.casts.insert("id".into(), "int8".into());
        t.casts.insert("age".into(), "int8".into());
        t.casts.insert("status".into(), "text".into());
        t
    }

    #[test]
    fn select_renders_predicates_in_order() {
        let mut query = SelectQuery::new(target());
        query.predicates = vec![
            Predicate::eq("status", json!("active")),
            Predicate::between("age", json!(18), json!(30)),
            Predicate::Any(vec![Predicate::eq("status", json!("a")), Predicate::contains("name", "bo")]),
        ];
        query.paginate(20, 40);
        let q = select(&query);
        assert_eq!(
            q.sql,
            "SELECT main.* FROM \"users\" main WHERE main.\"status\" = $1::text AND main.\"age\" BETWEEN $2::int8 AND $3::int8 \
AND (main.\"status\" = $4::text OR CAST(main.\"name\" AS text) LIKE $5 ESCAPE '\\') ORDER BY main.\"id\" ASC LIMIT 20 OFFSET 40"
        );
        assert_eq!(q.params, vec![json!("active"), json!(18), json!(30), json!("a"), json!("%bo%")]);
    }

    #[test]
    fn like_needle_is_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        let mut query = SelectQuery::new(target());
        query.predicates = vec![Predicate::contains("name", "a%b")];
        let q = select(&query);
        assert_eq!(q.params, vec![json!("%a\\%b%")]);
    }

    #[test]
    fn substring_match_casts_non_text_columns() {
        let mut query = SelectQuery::new(target());
        query.predicates = vec![Predicate::Any(vec![
            Predicate::contains("status", "2"),
            Predicate::contains("age", "2"),
        ])];
        let q = select(&query);
        assert!(q.sql.contains("(main.\"status\" LIKE $1 ESCAPE '\\' OR CAST(main.\"age\" AS text) LIKE $2 ESCAPE '\\')"));
        assert_eq!(q.params, vec![json!("%2%"), json!("%2%")]);
    }

    #[test]
    fn empty_or_group_renders_nothing() {
        let mut query = SelectQuery::new(target());
        query.predicates = vec![Predicate::Any(Vec::new())];
        let q = select(&query);
        assert!(!q.sql.contains("WHERE"));
    }

    #[test]
    fn projection_order_and_preloads() {
        let mut query = SelectQuery::new(target());
        query.columns = vec!["id".into(), "name".into()];
        query.order_by("name", SortOrder::Desc);
        query.preloads = vec![Relation::to_many("posts", "posts", "id", "user_id")];
        let q = select(&query);
        assert!(q.sql.starts_with("SELECT main.\"id\", main.\"name\", (SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM (SELECT * FROM \"posts\" WHERE \"user_id\" = main.\"id\") sub) AS \"posts\" FROM"));
        assert!(q.sql.ends_with("ORDER BY main.\"name\" DESC"));
    }

    #[test]
    fn to_one_join_uses_left_join() {
        let mut query = SelectQuery::new(target());
        query.joins = vec![
            Relation::to_one("team", "teams", "team_id", "id"),
            Relation::to_many("posts", "posts", "id", "user_id"),
        ];
        let q = select(&query);
        assert!(q.sql.contains(" LEFT JOIN \"teams\" AS \"team\" ON \"team\".\"id\" = main.\"team_id\""));
        assert!(!q.sql.contains("\"posts\""));
    }

    #[test]
    fn table_fragment_binds_args_first() {
        let mut t = target();
        t.table = TableRef::with_args("(SELECT * FROM users WHERE org_id = ?)", vec![json!(7)]);
        let mut query = SelectQuery::new(t);
        query.predicates = vec![Predicate::eq("status", json!("active"))];
        let q = select(&query);
        assert!(q.sql.contains("FROM (SELECT * FROM users WHERE org_id = $1) main"));
        assert!(q.sql.contains("main.\"status\" = $2::text"));
        assert_eq!(q.params, vec![json!(7), json!("active")]);
    }

    #[test]
    fn schema_qualified_table_is_quoted_per_part() {
        let mut t = target();
        t.table = TableRef::new("app.users");
        let q = count(&SelectQuery::new(t));
        assert_eq!(q.sql, "SELECT COUNT(*) FROM \"app\".\"users\" main");
    }

    #[test]
    fn insert_update_delete() {
        let mut row = Map::new();
        row.insert("age".into(), json!(21));
        row.insert("name".into(), json!("bo"));
        let q = insert(&target(), &row);
        assert_eq!(q.sql, "INSERT INTO \"users\" (\"age\", \"name\") VALUES ($1::int8, $2) RETURNING *");

        let q = update(&target(), 5, &row);
        assert_eq!(q.sql, "UPDATE \"users\" SET \"age\" = $1::int8, \"name\" = $2 WHERE \"id\" = $3::int8 RETURNING *");
        assert_eq!(q.params[2], json!(5));

        let q = delete(&target(), 5, DeleteMode::Soft);
        assert_eq!(q.sql, "UPDATE \"users\" SET \"deleted_at\" = NOW() WHERE \"id\" = $1::int8 AND \"deleted_at\" IS NULL");
        let q = delete(&target(), 5, DeleteMode::Permanent);
        assert_eq!(q.sql, "DELETE FROM \"users\" WHERE \"id\" = $1::int8");
    }

    #[test]
    fn exists_excludes_self() {
        let mut query = SelectQuery::new(target());
        query.predicates = vec![Predicate::eq("email", json!("a@example.com")), Predicate::not_eq("id", json!(3))];
        let q = exists(&query);
        assert_eq!(
            q.sql,
            "SELECT EXISTS(SELECT 1 FROM \"users\" main WHERE main.\"email\" = $1 AND main.\"id\" <> $2::int8)"
        );
    }
}
