//! HTTP request handlers. Thin: parse, delegate to the core, shape JSON.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use super::AppState;
use crate::gateway::{JobStatus, RequesterInfo, ServiceMode};

/// Header carrying the admin shared secret.
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    /// Optional caller-supplied conversation key.
    pub session: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub reply: String,
}

/// Pull requester metadata out of the inbound headers.
fn requester_info(headers: &HeaderMap) -> RequesterInfo {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .unwrap_or("unknown")
        .trim()
        .to_string();
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    RequesterInfo { ip, user_agent }
}

/// Handle POST /chat - synchronous dispatch.
///
/// Always 200 with a reply; upstream trouble surfaces only as fallback text.
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Json<ChatReply> {
    let requester = requester_info(&headers);
    tracing::info!(
        session = ?request.session,
        chars = request.message.len(),
        "Received chat request"
    );

    let reply = state
        .dispatcher
        .dispatch(&request.message, request.session.as_deref(), &requester)
        .await;

    Json(ChatReply { reply })
}

#[derive(Debug, Serialize)]
pub struct SubmitReply {
    pub job_id: String,
}

/// Handle POST /chat/async - submit and return a job id immediately.
pub async fn chat_async(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Json<SubmitReply> {
    let requester = requester_info(&headers);
    let job_id = state.jobs.submit(requester.clone());
    tracing::info!(job_id = %job_id, "Accepted async chat job");

    // Generation runs independently of this response; completion lands in
    // the registry for pollers.
    let dispatcher = state.dispatcher.clone();
    let jobs = state.jobs.clone();
    let id = job_id.clone();
    tokio::spawn(async move {
        let reply = dispatcher
            .dispatch(&request.message, None, &requester)
            .await;
        jobs.complete(&id, reply);
    });

    Json(SubmitReply { job_id })
}

#[derive(Debug, Serialize)]
pub struct PollReply {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
}

/// Handle GET /poll/{job_id} - non-blocking job status check.
pub async fn poll(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Json<PollReply> {
    let (status, reply) = match state.jobs.poll(&job_id) {
        JobStatus::Pending => ("pending", None),
        JobStatus::Done(reply) => ("done", Some(reply)),
        JobStatus::Expired => ("expired", None),
    };
    Json(PollReply { status, reply })
}

/// Handle POST /chat/stream - relay generated fragments as SSE events.
pub async fn chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let requester = requester_info(&headers);
    let rx = state.dispatcher.dispatch_stream(request.message, requester);

    let stream =
        ReceiverStream::new(rx).map(|fragment| Ok(Event::default().data(fragment)));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Handle GET / - plain-text liveness banner.
pub async fn root() -> &'static str {
    "papo gateway online"
}

/// Shared-secret comparison for the admin surface. No configured secret
/// means the surface is disabled entirely.
fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(secret) = &state.admin_secret else {
        return false;
    };
    headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|presented| presented == secret.expose_secret())
}

fn unauthorized() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "invalid admin key"})),
    )
        .into_response()
}

/// Handle GET /admin/mode
pub async fn admin_get_mode(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    Json(serde_json::json!({"mode": state.mode.current()})).into_response()
}

#[derive(Debug, Deserialize)]
pub struct SetModeRequest {
    pub mode: ServiceMode,
}

/// Handle POST /admin/mode - flip the tri-state service mode.
pub async fn admin_set_mode(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SetModeRequest>,
) -> axum::response::Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    state.mode.set(request.mode);
    tracing::info!(mode = %request.mode, "Service mode changed");
    Json(serde_json::json!({"mode": state.mode.current()})).into_response()
}

/// Handle GET /admin/jobs - snapshot tracked jobs.
pub async fn admin_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    Json(serde_json::json!({"jobs": state.jobs.snapshot()})).into_response()
}
