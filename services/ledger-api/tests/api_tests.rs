//! HTTP surface tests against a temporary SQLite ledger

use actix_web::{http::StatusCode, test, web, App};
use ledger_api::{handlers::configure_routes, middleware::TokenAuth};
use ledger_core::{Config, DatabaseConfig, Ledger, Metrics};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

async fn open_ledger() -> (Ledger, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.database = DatabaseConfig::for_path(temp_dir.path().join("ledger.db"));

    let ledger = Ledger::open(&config)
        .await
        .unwrap()
        .with_metrics(Arc::new(Metrics::new().unwrap()));
    (ledger, temp_dir)
}

macro_rules! test_app {
    ($ledger:expr) => {
        test_app!($ledger, None)
    };
    ($ledger:expr, $token:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($ledger.clone()))
                .configure(|cfg| configure_routes(cfg, TokenAuth::new($token))),
        )
        .await
    };
}

fn post_json(uri: &str, body: Value) -> test::TestRequest {
    test::TestRequest::post().uri(uri).set_json(body)
}

fn put_json(uri: &str, body: Value) -> test::TestRequest {
    test::TestRequest::put().uri(uri).set_json(body)
}

fn transfer(id: &str, amount: i64) -> Value {
    json!({
        "id": id,
        "lines": [
            {"account": "a", "delta": amount},
            {"account": "b", "delta": -amount}
        ]
    })
}

#[actix_web::test]
async fn test_ping() {
    let (ledger, _dir) = open_ledger().await;
    let app = test_app!(ledger);

    let req = test::TestRequest::get().uri("/ping").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({"ping": "pong"}));
}

#[actix_web::test]
async fn test_transaction_outcomes() {
    let (ledger, _dir) = open_ledger().await;
    let app = test_app!(ledger);

    let resp = test::call_service(&app, post_json("/v1/transactions", transfer("t1", 100)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = test::call_service(&app, post_json("/v1/transactions", transfer("t1", 100)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let resp = test::call_service(&app, post_json("/v1/transactions", transfer("t1", 200)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    assert_eq!(ledger.get_account("a").await.unwrap().balance, 100);
}

#[actix_web::test]
async fn test_transaction_rejections() {
    let (ledger, _dir) = open_ledger().await;
    let app = test_app!(ledger);

    let unbalanced = json!({
        "id": "t1",
        "lines": [{"account": "a", "delta": 100}, {"account": "b", "delta": -90}]
    });
    let resp = test::call_service(&app, post_json("/v1/transactions", unbalanced).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let bad_key = json!({
        "id": "t2",
        "data": {"bad key": 1},
        "lines": []
    });
    let resp = test::call_service(&app, post_json("/v1/transactions", bad_key).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let bad_timestamp = json!({
        "id": "t3",
        "timestamp": "last tuesday",
        "lines": []
    });
    let resp = test::call_service(&app, post_json("/v1/transactions", bad_timestamp).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri("/v1/transactions")
        .set_payload("{\"id\": ")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Positional arrays are not a transaction
    let resp = test::call_service(&app, post_json("/v1/transactions", json!(["t1"])).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    assert!(!ledger.storage().transaction_exists("t1").await.unwrap());
}

#[actix_web::test]
async fn test_update_transaction() {
    let (ledger, _dir) = open_ledger().await;
    let app = test_app!(ledger);

    let resp = test::call_service(&app, post_json("/v1/transactions", transfer("t1", 10)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = test::call_service(
        &app,
        put_json("/v1/transactions", json!({"id": "t1", "data": {"note": "rent"}})).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(
        &app,
        put_json("/v1/transactions", json!({"id": "ghost", "data": {}})).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let query = json!({"query": {"must": {"terms": [{"note": "rent"}]}}});
    let req = post_json("/v1/transactions/_search", query).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let hits = body.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["id"], "t1");
    assert_eq!(hits[0]["lines"][0], json!({"account": "a", "delta": 10}));
    assert_eq!(hits[0]["lines"][1], json!({"account": "b", "delta": -10}));
}

#[actix_web::test]
async fn test_account_lifecycle() {
    let (ledger, _dir) = open_ledger().await;
    let app = test_app!(ledger);

    let account = json!({"id": "acc1", "data": {"status": "active"}});
    let resp = test::call_service(&app, post_json("/v1/accounts", account.clone()).to_request()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = test::call_service(&app, post_json("/v1/accounts", account).to_request()).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = test::call_service(
        &app,
        post_json("/v1/accounts", json!({"id": "acc2", "data": {"status!": "x"}})).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = test::call_service(
        &app,
        put_json("/v1/accounts", json!({"id": "ghost", "data": {}})).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = test::call_service(
        &app,
        put_json("/v1/accounts", json!({"id": "acc1", "data": {"status": "frozen"}})).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get().uri("/v1/accounts/acc1").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({"id": "acc1", "balance": 0, "data": {"status": "frozen"}}));

    let req = test::TestRequest::get().uri("/v1/accounts/nobody").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_account_search() {
    let (ledger, _dir) = open_ledger().await;
    let app = test_app!(ledger);

    for (id, status) in [("acc1", "active"), ("acc2", "inactive")] {
        let body = json!({"id": id, "data": {"status": status}});
        let resp = test::call_service(&app, post_json("/v1/accounts", body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    let query = json!({"query": {"must": {"fields": [{"id": {"eq": "acc1"}}]}}});
    let req = post_json("/v1/accounts/_search", query).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!([{"id": "acc1", "balance": 0, "data": {"status": "active"}}]));

    // Empty GET body matches everything
    let req = test::TestRequest::get().uri("/v1/accounts").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    // No hits is an empty array, not null
    let query = json!({"query": {"must": {"terms": [{"status": "closed"}]}}});
    let req = post_json("/v1/accounts/_search", query).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!([]));
}

#[actix_web::test]
async fn test_invalid_query_has_empty_body() {
    let (ledger, _dir) = open_ledger().await;
    let app = test_app!(ledger);

    let query = json!({"query": {"must": {"terms": [{"bad key": "x"}]}}});
    let req = post_json("/v1/accounts/_search", query).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(test::read_body(resp).await.is_empty());

    let req = post_json("/v1/accounts/_search", json!([])).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(test::read_body(resp).await.is_empty());

    let req = test::TestRequest::post()
        .uri("/v1/transactions/_search")
        .set_payload("not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_balance_on_time() {
    let (ledger, _dir) = open_ledger().await;
    let app = test_app!(ledger);

    for (id, stamp) in [("t1", "2018-01-01 00:00:00"), ("t2", "2018-02-01 00:00:00")] {
        let mut body = transfer(id, 25);
        body["timestamp"] = json!(stamp);
        let resp = test::call_service(&app, post_json("/v1/transactions", body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    let req = test::TestRequest::get()
        .uri("/v1/accounts/a/balance?on=2018-01-15%2000:00:00")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(
        body,
        json!({"account_id": "a", "on": "2018-01-15 00:00:00.000", "balance": 25})
    );

    let req = test::TestRequest::get().uri("/v1/accounts/b/balance").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["balance"], -50);

    let req = test::TestRequest::get()
        .uri("/v1/accounts/a/balance?on=2017-12-31%2023:59:59")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["balance"], 0);

    let req = test::TestRequest::get()
        .uri("/v1/accounts/a/balance?on=soon")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_token_auth() {
    let (ledger, _dir) = open_ledger().await;
    let app = test_app!(ledger, Some("secret"));

    let resp = test::call_service(&app, post_json("/v1/transactions", transfer("t1", 5)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["type"], "unauthorized");

    let req = post_json("/v1/transactions", transfer("t1", 5))
        .insert_header(("LEDGER-AUTH-TOKEN", "wrong"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

    let req = post_json("/v1/transactions", transfer("t1", 5))
        .insert_header(("LEDGER-AUTH-TOKEN", "secret"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    // Liveness stays open
    let req = test::TestRequest::get().uri("/ping").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_metrics_endpoint() {
    let (ledger, _dir) = open_ledger().await;
    let app = test_app!(ledger);

    let resp = test::call_service(&app, post_json("/v1/transactions", transfer("t1", 1)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let body = test::call_and_read_body(&app, req).await;
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("ledger_transactions_total{outcome=\"created\"} 1"));
}
