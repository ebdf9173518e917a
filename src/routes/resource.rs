//! Resource routes: `GET/POST {path}`, `GET/PUT/DELETE {path}/:id`, `PATCH {path}/:id/restore`.

use crate::engine::RequestContext;
use crate::handlers::resource as handlers;
use crate::handlers::Configure;
use crate::model::Resource;
use crate::state::AppState;
use axum::routing::{get, patch};
use axum::Router;
use std::sync::Arc;

/// Mount CRUD routes for `T` under `path`. `configure` runs on every request
/// context before the operation.
pub fn resource_routes<T, F>(path: &str, configure: F) -> Router<AppState>
where
    T: Resource,
    F: Fn(&mut RequestContext<T>) + Send + Sync + 'static,
{
    let configure: Configure<T> = Arc::new(configure);
    let path = path.trim_end_matches('/');
    let item = format!("{}/:id", path);
    let restore = format!("{}/:id/restore", path);

    let (c1, c2, c3, c4, c5, c6) = (
        configure.clone(),
        configure.clone(),
        configure.clone(),
        configure.clone(),
        configure.clone(),
        configure,
    );
    Router::new()
        .route(
            path,
            get(move |ctx: RequestContext<T>| handlers::list(c1, ctx))
                .post(move |ctx: RequestContext<T>| handlers::create(c2, ctx)),
        )
        .route(
            &item,
            get(move |ctx: RequestContext<T>| handlers::read(c3, ctx))
                .put(move |ctx: RequestContext<T>| handlers::update(c4, ctx))
                .delete(move |ctx: RequestContext<T>| handlers::delete(c5, ctx)),
        )
        .route(&restore, patch(move |ctx: RequestContext<T>| handlers::restore(c6, ctx)))
}
