//! Integration tests for the chat endpoints.
//!
//! The axum router is driven with `tower::ServiceExt::oneshot`; the
//! upstream completion endpoint is a wiremock server so attempt counts and
//! credential usage can be asserted precisely.

use std::time::Duration;

use axum::body::Body;
use http::Request;
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use papo::config::Config;
use papo::gateway::dispatch::{
    DEGRADED_REPLY, EMPTY_MESSAGE_REPLY, MAINTENANCE_REPLY, OFFLINE_REPLY,
};
use papo::server::{create_router, AppState};

const ADMIN_SECRET: &str = "test-admin-secret";

/// Build a gateway config pointing at the given upstream URL.
fn test_config(upstream_url: &str, keys: &[&str], audit_path: &str) -> Config {
    let keys_toml = keys
        .iter()
        .map(|k| format!("\"{}\"", k))
        .collect::<Vec<_>>()
        .join(", ");
    let toml = format!(
        r#"
        [upstream]
        url = "{url}"
        model = "wormgpt-v7"
        api_keys = [{keys}]
        timeout_secs = 5
        attempt_cap = 3

        [jobs]
        retention_secs = 300

        [audit]
        path = "{audit}"

        [admin]
        secret = "{secret}"
        "#,
        url = upstream_url,
        keys = keys_toml,
        audit = audit_path,
        secret = ADMIN_SECRET,
    );
    Config::parse_str(&toml).unwrap()
}

fn test_app(upstream_url: &str, keys: &[&str], audit_path: &str) -> (axum::Router, AppState) {
    let config = test_config(upstream_url, keys, audit_path);
    let state = AppState::from_config(&config).unwrap();
    (create_router(state.clone()), state)
}

fn completion_body(reply: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": reply},
            "finish_reason": "stop"
        }]
    })
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn parse_body(response: axum::response::Response) -> (http::StatusCode, serde_json::Value) {
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .expect("read body");
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap_or_default();
    (status, json)
}

#[tokio::test]
async fn chat_returns_upstream_reply() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("**Olá!** Em que posso ajudar?")))
        .expect(1)
        .mount(&upstream)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let audit = dir.path().join("audit.jsonl");
    let url = format!("{}/v1/chat/completions", upstream.uri());
    let (app, _state) = test_app(&url, &["sk-one"], audit.to_str().unwrap());

    let response = app
        .oneshot(post_json("/chat", serde_json::json!({"message": "oi"})))
        .await
        .unwrap();
    let (status, json) = parse_body(response).await;

    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(json["reply"], "**Olá!** Em que posso ajudar?");
}

#[tokio::test]
async fn chat_fails_over_to_next_credential() {
    let upstream = MockServer::start().await;
    // First key always errors, second succeeds
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-bad"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-good"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("recuperado")))
        .expect(1)
        .mount(&upstream)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let audit = dir.path().join("audit.jsonl");
    let url = format!("{}/v1/chat/completions", upstream.uri());
    let (app, _state) = test_app(&url, &["sk-bad", "sk-good"], audit.to_str().unwrap());

    let response = app
        .oneshot(post_json("/chat", serde_json::json!({"message": "oi"})))
        .await
        .unwrap();
    let (_, json) = parse_body(response).await;

    assert_eq!(json["reply"], "recuperado");
}

#[tokio::test]
async fn chat_degrades_after_exhausting_pool() {
    let upstream = MockServer::start().await;
    // Two keys, cap 3: exactly min(3, 2) = 2 attempts expected
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&upstream)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let audit = dir.path().join("audit.jsonl");
    let url = format!("{}/v1/chat/completions", upstream.uri());
    let (app, _state) = test_app(&url, &["sk-a", "sk-b"], audit.to_str().unwrap());

    let response = app
        .oneshot(post_json("/chat", serde_json::json!({"message": "oi"})))
        .await
        .unwrap();
    let (status, json) = parse_body(response).await;

    // Degraded service is still a successful outcome for the caller
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(json["reply"], DEGRADED_REPLY);
}

#[tokio::test]
async fn empty_message_never_reaches_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("nunca")))
        .expect(0)
        .mount(&upstream)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let audit = dir.path().join("audit.jsonl");
    let url = format!("{}/v1/chat/completions", upstream.uri());
    let (app, _state) = test_app(&url, &["sk-one"], audit.to_str().unwrap());

    let response = app
        .oneshot(post_json("/chat", serde_json::json!({"message": "   "})))
        .await
        .unwrap();
    let (status, json) = parse_body(response).await;

    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(json["reply"], EMPTY_MESSAGE_REPLY);
}

#[tokio::test]
async fn async_job_lifecycle_pending_then_done() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("resposta assíncrona")))
        .mount(&upstream)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let audit = dir.path().join("audit.jsonl");
    let url = format!("{}/v1/chat/completions", upstream.uri());
    let (app, _state) = test_app(&url, &["sk-one"], audit.to_str().unwrap());

    let response = app
        .clone()
        .oneshot(post_json("/chat/async", serde_json::json!({"message": "oi"})))
        .await
        .unwrap();
    let (status, json) = parse_body(response).await;
    assert_eq!(status, http::StatusCode::OK);
    let job_id = json["job_id"].as_str().unwrap().to_string();

    // Poll until the background generation lands (bounded wait)
    let mut last = serde_json::Value::Null;
    for _ in 0..100 {
        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/poll/{}", job_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let (_, json) = parse_body(response).await;
        if json["status"] == "done" {
            last = json;
            break;
        }
        assert_eq!(json["status"], "pending");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(last["status"], "done");
    assert_eq!(last["reply"], "resposta assíncrona");
}

#[tokio::test]
async fn poll_unknown_job_reports_expired() {
    let dir = tempfile::tempdir().unwrap();
    let audit = dir.path().join("audit.jsonl");
    let (app, _state) = test_app("http://127.0.0.1:9/none", &["sk-one"], audit.to_str().unwrap());

    let response = app
        .oneshot(
            Request::get("/poll/no-such-job")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let (status, json) = parse_body(response).await;

    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(json["status"], "expired");
    assert!(json.get("reply").is_none());
}

#[tokio::test]
async fn admin_endpoints_reject_missing_or_wrong_secret() {
    let dir = tempfile::tempdir().unwrap();
    let audit = dir.path().join("audit.jsonl");
    let (app, _state) = test_app("http://127.0.0.1:9/none", &["sk-one"], audit.to_str().unwrap());

    let response = app
        .clone()
        .oneshot(Request::get("/admin/mode").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), http::StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::get("/admin/jobs")
                .header("x-admin-key", "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn service_mode_gates_dispatch_without_upstream_calls() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("nunca")))
        .expect(0)
        .mount(&upstream)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let audit = dir.path().join("audit.jsonl");
    let url = format!("{}/v1/chat/completions", upstream.uri());
    let (app, _state) = test_app(&url, &["sk-one"], audit.to_str().unwrap());

    for (mode, expected) in [("offline", OFFLINE_REPLY), ("maintenance", MAINTENANCE_REPLY)] {
        let response = app
            .clone()
            .oneshot(
                Request::post("/admin/mode")
                    .header("x-admin-key", ADMIN_SECRET)
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"mode": mode}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);

        let response = app
            .clone()
            .oneshot(post_json("/chat", serde_json::json!({"message": "oi"})))
            .await
            .unwrap();
        let (status, json) = parse_body(response).await;
        assert_eq!(status, http::StatusCode::OK);
        assert_eq!(json["reply"], expected, "mode = {}", mode);
    }
}

#[tokio::test]
async fn mode_can_be_restored_to_online() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("de volta")))
        .expect(1)
        .mount(&upstream)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let audit = dir.path().join("audit.jsonl");
    let url = format!("{}/v1/chat/completions", upstream.uri());
    let (app, state) = test_app(&url, &["sk-one"], audit.to_str().unwrap());

    state.mode.set(papo::gateway::ServiceMode::Offline);

    let response = app
        .clone()
        .oneshot(
            Request::post("/admin/mode")
                .header("x-admin-key", ADMIN_SECRET)
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({"mode": "online"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), http::StatusCode::OK);

    let response = app
        .oneshot(post_json("/chat", serde_json::json!({"message": "oi"})))
        .await
        .unwrap();
    let (_, json) = parse_body(response).await;
    assert_eq!(json["reply"], "de volta");
}

#[tokio::test]
async fn root_serves_liveness_banner() {
    let dir = tempfile::tempdir().unwrap();
    let audit = dir.path().join("audit.jsonl");
    let (app, _state) = test_app("http://127.0.0.1:9/none", &["sk-one"], audit.to_str().unwrap());

    let response = app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), http::StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"papo gateway online");
}

#[tokio::test]
async fn exchanges_are_audited_to_jsonl() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("auditado")))
        .mount(&upstream)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let audit = dir.path().join("audit.jsonl");
    let url = format!("{}/v1/chat/completions", upstream.uri());
    let (app, _state) = test_app(&url, &["sk-one"], audit.to_str().unwrap());

    let request = Request::post("/chat")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.7")
        .header("user-agent", "teste/1.0")
        .body(Body::from(
            serde_json::json!({"message": "registre isso"}).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let (_, json) = parse_body(response).await;
    assert_eq!(json["reply"], "auditado");

    // The audit write is fire-and-forget; wait for the line to land
    let mut content = String::new();
    for _ in 0..100 {
        content = std::fs::read_to_string(&audit).unwrap_or_default();
        if !content.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let record: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(record["ip"], "203.0.113.7");
    assert_eq!(record["user_agent"], "teste/1.0");
    assert_eq!(record["message"], "registre isso");
    assert_eq!(record["reply"], "auditado");
    assert_eq!(record["key_index"], 0);
    assert_eq!(record["streaming"], false);
}
