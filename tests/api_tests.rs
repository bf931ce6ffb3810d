mod common;

use chrono::Utc;
use reqwest::StatusCode;
use serde_json::json;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crm_relay::client::Mode;
use crm_relay::models::{NewQueueItem, QueueStatus};
use crm_relay::store::QueueStore;

fn failed_row(api_url: &str) -> NewQueueItem {
    NewQueueItem {
        status: QueueStatus::Failed,
        next_run_at: None,
        tries: 3,
        mode: Mode::Async,
        operation: "Website.OrderCreated".into(),
        payload: r#"{"order":{"id":"42"}}"#.into(),
        device_id: None,
        authorize: false,
        api_url: api_url.into(),
        endpoint_id: common::ENDPOINT_ID.into(),
        timeout_secs: 5,
        idempotency_token: "tx-failed".into(),
        diagnostics: None,
        created_at: Utc::now(),
    }
}

// ── Health ──────────────────────────────────────────────────────

#[tokio::test]
async fn health_returns_ok() {
    let app = common::spawn_app().await;

    let resp = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

// ── Operations ──────────────────────────────────────────────────

#[tokio::test]
async fn operation_delivered_returns_data() {
    let app = common::spawn_app().await;
    Mock::given(method("POST"))
        .and(path("/v3/operations/sync"))
        .and(query_param("endpointId", common::ENDPOINT_ID))
        .and(query_param("operation", "Website.GetCustomer"))
        .and(query_param("deviceUUID", "dev-1"))
        .and(query_param("transactionId", "tx-1"))
        .and(header("Authorization", "SecretKey test-secret-key"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "Success", "customer": {"id": 7}})),
        )
        .expect(1)
        .mount(&app.crm)
        .await;

    let (body, status) = app
        .post(
            concat!(
                "/api/v1/operations/sync/Website.GetCustomer",
                "?deviceUUID=dev-1&authorization=true&transactionId=tx-1"
            ),
            &json!({"customer": {"email": "a@b.c"}}),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["data"]["customer"]["id"], 7);
    assert!(app.store.all().await.is_empty());
}

#[tokio::test]
async fn operation_validation_error_returns_422() {
    let app = common::spawn_app().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ValidationError",
            "validationMessages": [{"location": "/customer/email", "message": "Invalid email"}]
        })))
        .mount(&app.crm)
        .await;

    let (body, status) = app
        .post("/api/v1/operations/sync/Website.Register", &json!({"customer": {}}))
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "ValidationError");
    assert_eq!(body["validationMessages"][0]["location"], "/customer/email");
    assert!(app.store.all().await.is_empty());
}

#[tokio::test]
async fn operation_protocol_error_returns_502_and_records_failure() {
    let app = common::spawn_app().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "status": "ProtocolError",
            "errorId": "abc-123",
            "errorMessage": "Operation not found"
        })))
        .mount(&app.crm)
        .await;

    let (body, status) = app
        .post("/api/v1/operations/async/Website.Missing", &json!({}))
        .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["kind"], "ProtocolError");
    assert_eq!(body["httpStatus"], 400);
    assert_eq!(body["errorId"], "abc-123");

    let rows = app.store.all().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, QueueStatus::Failed);
}

#[tokio::test]
async fn operation_gateway_error_is_queued() {
    let app = common::spawn_app().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&app.crm)
        .await;

    let (body, status) = app
        .post(
            "/api/v1/operations/async/Website.OrderCreated?transactionId=tx-queued",
            &json!({"order": {"id": "1"}}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!(null));

    let rows = app.store.all().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, QueueStatus::Retry);
    assert_eq!(rows[0].idempotency_token, "tx-queued");
    assert_eq!(rows[0].http_status, Some(503));
}

#[tokio::test]
async fn operation_body_is_forwarded_and_stored_verbatim() {
    let app = common::spawn_app().await;
    let raw = concat!(
        r#"{"z":1,"amount":12345678901234567890123,"#,
        r#""price":0.1000000000000000055511151231257827}"#
    );
    Mock::given(method("POST"))
        .and(body_string(raw))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&app.crm)
        .await;

    let resp = app
        .client
        .post(app.url("/api/v1/operations/async/Website.OrderCreated"))
        .header("content-type", "application/json")
        .body(raw)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let rows = app.store.all().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, QueueStatus::Retry);
    assert_eq!(rows[0].payload, raw);
}

#[tokio::test]
async fn operation_rejects_unknown_mode_and_bad_json() {
    let app = common::spawn_app().await;

    let (_, status) = app.post("/api/v1/operations/batch/Website.Test", &json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let resp = app
        .client
        .post(app.url("/api/v1/operations/sync/Website.Test"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(app.store.all().await.is_empty());
}

// ── Queue ───────────────────────────────────────────────────────

#[tokio::test]
async fn queue_list_filters_by_status() {
    let app = common::spawn_app().await;
    let failed = app.store.add(failed_row("http://unused")).await.unwrap();
    app.store
        .add(NewQueueItem {
            status: QueueStatus::Retry,
            next_run_at: Some(Utc::now()),
            ..failed_row("http://unused")
        })
        .await
        .unwrap();

    let (body, status) = app.get("/api/v1/queue").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);

    let (body, status) = app.get("/api/v1/queue?status=failed").await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], failed.id);
    assert_eq!(items[0]["status"], "failed");

    let (_, status) = app.get("/api/v1/queue?status=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn queue_get_returns_row_or_404() {
    let app = common::spawn_app().await;
    let row = app.store.add(failed_row("http://unused")).await.unwrap();

    let (body, status) = app.get(&format!("/api/v1/queue/{}", row.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["operation"], "Website.OrderCreated");
    assert_eq!(body["idempotency_token"], "tx-failed");

    let (_, status) = app.get("/api/v1/queue/9999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn requeue_then_tick_delivers_failed_row() {
    let app = common::spawn_app().await;
    Mock::given(method("POST"))
        .and(query_param("transactionId", "tx-failed"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.crm)
        .await;
    let row = app.store.add(failed_row(&app.crm.uri())).await.unwrap();

    let (body, status) = app.post("/api/v1/queue/tick", &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fetched"], 0);

    let (body, status) = app
        .post(&format!("/api/v1/queue/{}/requeue", row.id), &json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "retry");
    assert_eq!(body["tries"], 3);

    let (body, status) = app
        .post(&format!("/api/v1/queue/{}/requeue", row.id), &json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (body, status) = app.post("/api/v1/queue/tick", &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["succeeded"], 1);
    assert_eq!(body["reschedule_after_secs"], 300);

    let row = app.store.find(row.id).await.unwrap().unwrap();
    assert_eq!(row.status, QueueStatus::Success);
}

#[tokio::test]
async fn requeue_unknown_row_is_404() {
    let app = common::spawn_app().await;
    let (_, status) = app.post("/api/v1/queue/42/requeue", &json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── Admin token ─────────────────────────────────────────────────

#[tokio::test]
async fn admin_token_is_enforced() {
    let app = common::spawn_app_with_token(Some("s3cret")).await;

    let resp = app.client.get(app.url("/api/v1/queue")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .client
        .get(app.url("/api/v1/queue"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let (_, status) = app.get("/api/v1/queue").await;
    assert_eq!(status, StatusCode::OK);

    let resp = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
