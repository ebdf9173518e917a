//! Build a [`RequestContext`] from path params, query string and JSON body.

use crate::engine::RequestContext;
use crate::error::AppError;
use crate::model::Resource;
use crate::state::AppState;
use async_trait::async_trait;
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Largest body read by the extractor; routes may set a lower limit with a layer.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

fn parse_payload(bytes: &[u8]) -> Result<Map<String, Value>, AppError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AppError::BadRequest("body must be a JSON object".into())),
        Err(e) => Err(AppError::BadRequest(format!("invalid JSON body: {}", e))),
    }
}

#[async_trait]
impl<T: Resource> FromRequest<AppState> for RequestContext<T> {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();
        let path_params = Path::<HashMap<String, String>>::from_request_parts(&mut parts, state)
            .await
            .map(|Path(p)| p)
            .unwrap_or_default();
        let params = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .map_err(|e| AppError::BadRequest(format!("invalid query string: {}", e)))?;
        let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| AppError::BadRequest(format!("unreadable body: {}", e)))?;
        let payload = parse_payload(&bytes)?;

        let (page_size, max_page_size) = state.page_size();
        let mut ctx = RequestContext::new(state.store.clone(), &state.models)
            .with_params(params)
            .with_payload(payload);
        ctx.path_params = path_params;
        ctx.set_page_size(page_size, max_page_size);
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_is_empty_payload() {
        assert!(parse_payload(b"").unwrap().is_empty());
        assert!(parse_payload(b"  \n").unwrap().is_empty());
        assert_eq!(parse_payload(br#"{"a": 1}"#).unwrap()["a"], 1);
        assert!(parse_payload(b"[1]").is_err());
        assert!(parse_payload(b"{oops").is_err());
    }
}
