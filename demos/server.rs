//! Demo server: serves a `users` resource from PostgreSQL when `[database] url` is set,
//! otherwise from the in-memory store.

use axum::Router;
use chrono::{DateTime, Utc};
use resource_engine::{
    common_routes, resource_routes, AppState, FieldDef, Fields, KeyValueCache, MemoryStore,
    ModelCollection, PgStore, Relation, Resource, Settings, Store,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Base {
    id: u64,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
}

impl Fields for Base {
    const TYPE_NAME: &'static str = "Base";

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::field("id", "u64").db("primaryKey"),
            FieldDef::field("created_at", "Option<DateTime<Utc>>"),
            FieldDef::field("updated_at", "Option<DateTime<Utc>>"),
            FieldDef::field("deleted_at", "Option<DateTime<Utc>>").db("index"),
        ]
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct User {
    #[serde(flatten)]
    base: Base,
    name: String,
    email: String,
    status: String,
    age: i64,
    #[serde(default)]
    posts: Vec<serde_json::Value>,
}

impl Fields for User {
    const TYPE_NAME: &'static str = "User";

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::embed::<Base>(),
            FieldDef::field("name", "String").tag("list:fussy,search"),
            FieldDef::field("email", "String").tag("list:search").db("uniqueIndex"),
            FieldDef::field("status", "String").tag("list:in").db("default:active"),
            FieldDef::field("age", "i64").tag("list:between"),
            FieldDef::field("posts", "Vec<Post>"),
        ]
    }
}

impl Resource for User {
    const TABLE: &'static str = "users";

    fn relations() -> Vec<Relation> {
        vec![Relation::to_many("posts", "posts", "id", "user_id")]
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("resource_engine=info".parse()?))
        .init();

    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "using default settings");
            Settings::default()
        }
    };

    let store: Arc<dyn Store> = if settings.database.url.is_empty() {
        tracing::info!("no database configured, using in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(settings.database.max_connections)
            .connect(&settings.database.url)
            .await?;
        Arc::new(PgStore::new(pool))
    };

    let cache = if settings.redis.addr.is_empty() {
        None
    } else {
        Some(KeyValueCache::connect(&settings.redis).await?)
    };

    let models = ModelCollection::new().register::<User>().resolve_all();
    let addr = settings.server.bind_addr();
    let mut state = AppState::new(store, models, settings);
    if let Some(cache) = cache {
        state = state.with_cache(cache);
    }

    let users = resource_routes::<User, _>("/api/users", |ctx| {
        ctx.apply_field_tags()
            .set_valid_rules([("name", "required,max=64"), ("email", "required,email,unique")])
            .add_selected_fields(["id", "name", "email", "status", "age", "created_at", "updated_at"])
            .add_col_white_list(["created_at"])
            .set_preloads(["posts"]);
    });

    let app = Router::new()
        .merge(users)
        .merge(common_routes())
        .with_state(state)
        .layer(ServiceBuilder::new().layer(RequestBodyLimitLayer::new(1024 * 1024)));

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
