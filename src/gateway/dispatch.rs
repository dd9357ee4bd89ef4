//! Dispatch orchestration: retry/failover across the key pool.
//!
//! The dispatcher is the only component that talks to everything else. It
//! gates on service mode and empty input, loads session history, walks the
//! key pool until an attempt produces a reply, sanitizes, appends the
//! exchange to the session, and audits. Callers always get a reply string;
//! upstream instability turns into fixed fallback texts, never errors.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::gateway::audit::{spawn_record, AuditSink, ExchangeRecord};
use crate::gateway::client::{ChatPrompt, CompletionClient, CompletionOptions};
use crate::gateway::keys::KeyPool;
use crate::gateway::sanitize::Sanitizer;
use crate::gateway::session::{SessionStore, Turn};
use crate::gateway::stream::{relay, STREAM_FALLBACK_FRAGMENT};
use crate::gateway::RequesterInfo;

/// Fixed reply for a blank inbound message.
pub const EMPTY_MESSAGE_REPLY: &str = "**Erro:** mensagem vazia.";

/// Fixed reply when every attempt against the pool failed.
pub const DEGRADED_REPLY: &str = "**Erro:** não foi possível gerar resposta.";

/// Fixed reply while the service mode is `offline`.
pub const OFFLINE_REPLY: &str = "**Aviso:** o serviço está temporariamente offline.";

/// Fixed reply while the service mode is `maintenance`.
pub const MAINTENANCE_REPLY: &str =
    "**Aviso:** o serviço está em manutenção. Tente novamente mais tarde.";

/// Tri-state service mode checked before any upstream attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    Online,
    Offline,
    Maintenance,
}

impl ServiceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceMode::Online => "online",
            ServiceMode::Offline => "offline",
            ServiceMode::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(ServiceMode::Online),
            "offline" => Ok(ServiceMode::Offline),
            "maintenance" => Ok(ServiceMode::Maintenance),
            other => Err(format!("unknown service mode '{}'", other)),
        }
    }
}

/// Shared service-mode cell, flipped by the admin surface and read on
/// every dispatch.
pub struct ModeGate {
    mode: RwLock<ServiceMode>,
}

impl ModeGate {
    pub fn new() -> Self {
        Self {
            mode: RwLock::new(ServiceMode::Online),
        }
    }

    pub fn current(&self) -> ServiceMode {
        *self.mode.read().expect("mode lock poisoned")
    }

    pub fn set(&self, mode: ServiceMode) {
        *self.mode.write().expect("mode lock poisoned") = mode;
    }
}

impl Default for ModeGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Orchestrates one end-to-end reply attempt, retries included.
pub struct Dispatcher {
    pool: Arc<KeyPool>,
    client: Arc<dyn CompletionClient>,
    sessions: Arc<SessionStore>,
    audit: Arc<dyn AuditSink>,
    mode: Arc<ModeGate>,
    sanitizer: Sanitizer,
    options: CompletionOptions,
    system_prompt: String,
    attempt_cap: u32,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: Arc<KeyPool>,
        client: Arc<dyn CompletionClient>,
        sessions: Arc<SessionStore>,
        audit: Arc<dyn AuditSink>,
        mode: Arc<ModeGate>,
        options: CompletionOptions,
        system_prompt: String,
        attempt_cap: u32,
    ) -> Self {
        Self {
            pool,
            client,
            sessions,
            audit,
            mode,
            sanitizer: Sanitizer::new(),
            options,
            system_prompt,
            attempt_cap,
        }
    }

    /// Effective attempt budget: retrying past one full pool rotation would
    /// only replay keys that already failed this dispatch.
    fn max_attempts(&self) -> usize {
        (self.attempt_cap as usize).min(self.pool.len())
    }

    /// Pre-flight checks that must not cost an upstream call.
    fn gate(&self, message: &str) -> Option<&'static str> {
        match self.mode.current() {
            ServiceMode::Offline => return Some(OFFLINE_REPLY),
            ServiceMode::Maintenance => return Some(MAINTENANCE_REPLY),
            ServiceMode::Online => {}
        }
        if message.trim().is_empty() {
            return Some(EMPTY_MESSAGE_REPLY);
        }
        None
    }

    fn prompt(&self, history: Vec<Turn>, message: &str) -> ChatPrompt {
        ChatPrompt {
            system: self.system_prompt.clone(),
            history,
            user: message.to_string(),
        }
    }

    /// Produce a reply for one message, retrying across the key pool.
    ///
    /// Always returns user-facing text; attempt failures are logged and
    /// swallowed. On success the exchange is appended to the session (when
    /// a key was supplied) and the reply is sanitized first.
    pub async fn dispatch(
        &self,
        message: &str,
        session_key: Option<&str>,
        requester: &RequesterInfo,
    ) -> String {
        if let Some(fallback) = self.gate(message) {
            self.record(requester, message, fallback, None, false);
            return fallback.to_string();
        }

        let history = session_key
            .map(|key| self.sessions.load(key))
            .unwrap_or_default();
        let prompt = self.prompt(history, message);

        for attempt in 1..=self.max_attempts() {
            let (key_index, key) = self.pool.acquire();
            match self.client.complete(&key, &prompt, &self.options).await {
                Ok(reply) => {
                    let reply = self.sanitizer.sanitize(&reply);
                    if let Some(session_key) = session_key {
                        self.sessions.append(
                            session_key,
                            Turn::user(message),
                            Turn::assistant(reply.clone()),
                        );
                    }
                    self.record(requester, message, &reply, Some(key_index), false);
                    return reply;
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        key_index,
                        error = %e,
                        "Upstream attempt failed, rotating to next key"
                    );
                }
            }
        }

        tracing::error!(
            attempts = self.max_attempts(),
            "All upstream attempts exhausted, returning degraded reply"
        );
        self.record(requester, message, DEGRADED_REPLY, None, false);
        DEGRADED_REPLY.to_string()
    }

    /// Streaming variant: fragments are forwarded through the returned
    /// channel as they arrive.
    ///
    /// Failover applies only while establishing the stream; once fragments
    /// flow, a mid-stream fault ends the relay with a fallback fragment
    /// (re-dialing would duplicate text the caller already saw). The full
    /// concatenation is audited either way.
    pub fn dispatch_stream(
        self: &Arc<Self>,
        message: String,
        requester: RequesterInfo,
    ) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(32);
        let dispatcher = self.clone();

        tokio::spawn(async move {
            if let Some(fallback) = dispatcher.gate(&message) {
                let _ = tx.send(fallback.to_string()).await;
                dispatcher.record(&requester, &message, fallback, None, true);
                return;
            }

            let prompt = dispatcher.prompt(Vec::new(), &message);

            for attempt in 1..=dispatcher.max_attempts() {
                let (key_index, key) = dispatcher.pool.acquire();
                match dispatcher
                    .client
                    .open_stream(&key, &prompt, &dispatcher.options)
                    .await
                {
                    Ok(stream) => {
                        let outcome = relay(stream, &tx).await;
                        tracing::info!(
                            key_index,
                            completed = outcome.completed,
                            chars = outcome.text.len(),
                            "Stream relay finished"
                        );
                        dispatcher.record(
                            &requester,
                            &message,
                            &outcome.text,
                            Some(key_index),
                            true,
                        );
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(
                            attempt,
                            key_index,
                            error = %e,
                            "Failed to open upstream stream, rotating to next key"
                        );
                    }
                }
            }

            let _ = tx.send(STREAM_FALLBACK_FRAGMENT.to_string()).await;
            dispatcher.record(&requester, &message, STREAM_FALLBACK_FRAGMENT, None, true);
        });

        rx
    }

    fn record(
        &self,
        requester: &RequesterInfo,
        message: &str,
        reply: &str,
        key_index: Option<usize>,
        streaming: bool,
    ) {
        spawn_record(
            &self.audit,
            ExchangeRecord::new(
                requester.ip.clone(),
                requester.user_agent.clone(),
                message,
                reply,
                key_index,
                streaming,
            ),
        );
    }
}
