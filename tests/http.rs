mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use common::{models, seeded_store, Member};
use resource_engine::{common_routes, resource_routes, AppState, Settings};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> Router {
    let members = resource_routes::<Member, _>("/members", |ctx| {
        ctx.apply_field_tags()
            .set_valid_rules([("name", "required,min=2"), ("email", "required,email,unique")]);
    });
    Router::new()
        .merge(members)
        .merge(common_routes())
        .with_state(AppState::new(seeded_store(), models(), Settings::default()))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let res = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_and_readiness() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&app, Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "ok");
}

#[tokio::test]
async fn list_applies_tagged_filters_from_query() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/members?status=disabled&age=40,50", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["data"][0]["name"], "cat");
    assert_eq!(body["pagination"]["total"], 1);
}

#[tokio::test]
async fn crud_round_through_the_router() {
    let app = app();

    let (status, created) = send(
        &app,
        Method::POST,
        "/members",
        Some(json!({"name": "fay", "email": "fay@example.com", "age": 27})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_u64().unwrap();

    let (status, fetched) = send(&app, Method::GET, &format!("/members/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["email"], "fay@example.com");

    let (status, updated) = send(&app, Method::PUT, &format!("/members/{}", id), Some(json!({"age": 28}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["age"], 28);

    let (status, body) = send(&app, Method::DELETE, &format!("/members/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());

    let (status, body) = send(&app, Method::GET, &format!("/members/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, restored) = send(&app, Method::PATCH, &format!("/members/{}/restore", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(restored["name"], "fay");
}

#[tokio::test]
async fn rejects_bad_bodies_and_duplicates() {
    let app = app();

    let (status, body) = send(&app, Method::POST, "/members", Some(json!([1, 2]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = send(
        &app,
        Method::POST,
        "/members",
        Some(json!({"name": "bob", "email": "bob@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
    assert!(body["error"]["details"]["email"].is_string());
}
