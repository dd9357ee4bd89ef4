//! HTTP server setup and shared application state.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::{ApiKey, Config};
use crate::error::Result;
use crate::gateway::audit::{AuditSink, JsonlSink};
use crate::gateway::client::{CompletionOptions, HttpCompletionClient};
use crate::gateway::jobs::spawn_sweeper;
use crate::gateway::{Dispatcher, JobRegistry, KeyPool, ModeGate, SessionStore};

mod handlers;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub jobs: Arc<JobRegistry>,
    pub mode: Arc<ModeGate>,
    pub admin_secret: Option<ApiKey>,
}

impl AppState {
    /// Wire the core together from configuration.
    ///
    /// Fails fast when the key pool is empty: the gateway must not accept
    /// dispatches it can never serve.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let pool = Arc::new(KeyPool::new(config.upstream.api_keys.clone())?);
        let client = Arc::new(HttpCompletionClient::new(http, config.upstream.url.clone()));
        let sessions = Arc::new(SessionStore::new(config.session.max_turns));
        let audit: Arc<dyn AuditSink> = Arc::new(JsonlSink::new(&config.audit.path));
        let mode = Arc::new(ModeGate::new());

        let dispatcher = Arc::new(Dispatcher::new(
            pool,
            client,
            sessions,
            audit,
            mode.clone(),
            CompletionOptions::from(&config.upstream),
            config.upstream.system_prompt.clone(),
            config.upstream.attempt_cap,
        ));

        Ok(Self {
            dispatcher,
            jobs: Arc::new(JobRegistry::new(config.jobs.retention())),
            mode,
            admin_secret: config.admin.secret.clone(),
        })
    }
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/chat", post(handlers::chat))
        .route("/chat/async", post(handlers::chat_async))
        .route("/chat/stream", post(handlers::chat_stream))
        .route("/poll/:job_id", get(handlers::poll))
        .route(
            "/admin/mode",
            get(handlers::admin_get_mode).post(handlers::admin_set_mode),
        )
        .route("/admin/jobs", get(handlers::admin_jobs))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // The original front-end is served from a different origin
        .layer(CorsLayer::permissive())
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    let state = AppState::from_config(&config)?;
    spawn_sweeper(state.jobs.clone(), config.jobs.sweep_interval());

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting papo gateway");

    axum::serve(listener, app).await?;

    Ok(())
}
