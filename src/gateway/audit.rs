//! Fire-and-forget exchange logging.
//!
//! Every completed exchange (message in, reply out) is handed to an
//! append-only sink. The write happens on a spawned task and must never
//! block or fail the dispatch path; a failed write is a warning, nothing
//! more. The sink owns no query capability - it is an external
//! collaborator, not a storage engine.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

/// A completed exchange ready for the audit log.
///
/// All fields are owned so the record can move into a spawned task.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeRecord {
    pub timestamp: String,
    pub ip: String,
    pub user_agent: String,
    pub message: String,
    pub reply: String,
    /// Which pool slot served the reply; absent for fallback replies that
    /// never reached the upstream.
    pub key_index: Option<usize>,
    pub streaming: bool,
}

impl ExchangeRecord {
    pub fn new(
        ip: impl Into<String>,
        user_agent: impl Into<String>,
        message: impl Into<String>,
        reply: impl Into<String>,
        key_index: Option<usize>,
        streaming: bool,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            ip: ip.into(),
            user_agent: user_agent.into(),
            message: message.into(),
            reply: reply.into(),
            key_index,
            streaming,
        }
    }
}

/// Append-only destination for exchange records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &ExchangeRecord) -> anyhow::Result<()>;
}

/// JSON-lines file sink, one record per line, append-only.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AuditSink for JsonlSink {
    async fn record(&self, record: &ExchangeRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Spawn a fire-and-forget audit write.
///
/// If the write fails, a warning is logged but the error is not propagated.
pub fn spawn_record(sink: &Arc<dyn AuditSink>, record: ExchangeRecord) {
    let sink = sink.clone();
    tokio::spawn(async move {
        if let Err(e) = sink.record(&record).await {
            tracing::warn!(error = %e, "Failed to write exchange audit record");
        }
    });
}
