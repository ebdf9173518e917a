//! Resource handlers: apply the route's configuration, then run the operation.

use crate::engine::RequestContext;
use crate::error::AppError;
use crate::model::Resource;
use crate::response::Reply;
use std::sync::Arc;

/// Per-route configuration applied to every request context before the operation runs.
pub type Configure<T> = Arc<dyn Fn(&mut RequestContext<T>) + Send + Sync>;

pub async fn list<T: Resource>(configure: Configure<T>, mut ctx: RequestContext<T>) -> Result<Reply, AppError> {
    configure(&mut ctx);
    ctx.list().await
}

pub async fn read<T: Resource>(configure: Configure<T>, mut ctx: RequestContext<T>) -> Result<Reply, AppError> {
    configure(&mut ctx);
    ctx.get().await
}

pub async fn create<T: Resource>(configure: Configure<T>, mut ctx: RequestContext<T>) -> Result<Reply, AppError> {
    configure(&mut ctx);
    ctx.create().await
}

pub async fn update<T: Resource>(configure: Configure<T>, mut ctx: RequestContext<T>) -> Result<Reply, AppError> {
    configure(&mut ctx);
    ctx.update().await
}

pub async fn delete<T: Resource>(configure: Configure<T>, mut ctx: RequestContext<T>) -> Result<Reply, AppError> {
    configure(&mut ctx);
    ctx.delete().await
}

pub async fn restore<T: Resource>(configure: Configure<T>, mut ctx: RequestContext<T>) -> Result<Reply, AppError> {
    configure(&mut ctx);
    ctx.restore().await
}
