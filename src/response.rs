//! Response produced by engine operations and hooks.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use crate::error::AppError;
use serde_json::Value;

/// Status plus JSON body. `body == None` renders an empty response (e.g. 204).
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Option<Value>,
}

impl Reply {
    pub fn new(status: StatusCode, body: Value) -> Self {
        Reply {
            status,
            body: Some(body),
        }
    }

    pub fn ok(body: Value) -> Self {
        Reply::new(StatusCode::OK, body)
    }

    pub fn created(body: Value) -> Self {
        Reply::new(StatusCode::CREATED, body)
    }

    pub fn no_content() -> Self {
        Reply {
            status: StatusCode::NO_CONTENT,
            body: None,
        }
    }

    /// Error-shaped reply for hooks that abort an operation.
    pub fn error(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Reply::new(status, error_body(code, message.into(), None))
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => self.status.into_response(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
    pub total_pages: u64,
}

impl Pagination {
    pub fn new(total: u64, per_page: u64, current_page: u64) -> Self {
        let total_pages = if per_page == 0 {
            0
        } else {
            total.div_ceil(per_page)
        };
        Pagination {
            total,
            per_page,
            current_page,
            total_pages,
        }
    }
}

#[derive(Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

pub fn page_body<T: Serialize>(data: Vec<T>, pagination: Pagination) -> Result<Value, AppError> {
    serde_json::to_value(Page { data, pagination }).map_err(|e| AppError::Internal(format!("encode page: {}", e)))
}

pub fn error_body(code: &str, message: String, details: Option<Value>) -> Value {
    serde_json::json!({
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_rounds_pages_up() {
        let p = Pagination::new(41, 20, 1);
        assert_eq!(p.total_pages, 3);
        assert_eq!(Pagination::new(0, 20, 1).total_pages, 0);
        assert_eq!(Pagination::new(40, 20, 2).total_pages, 2);
    }

    #[test]
    fn page_body_has_data_and_pagination() {
        let body = page_body(vec![serde_json::json!({"id": 1})], Pagination::new(1, 20, 1)).unwrap();
        assert_eq!(body["data"][0]["id"], 1);
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["pagination"]["per_page"], 20);
    }
}
