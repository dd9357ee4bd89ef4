//! Upstream completion client.
//!
//! One bounded-time call to the chat-completion endpoint per invocation,
//! batch or streaming. The [`CompletionClient`] trait is the seam the
//! dispatcher retries across; tests substitute counting stubs for it.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};

use crate::config::{ApiKey, UpstreamConfig};
use crate::error::{Error, Result};
use crate::gateway::session::Turn;

/// Raw upstream byte chunks, errors already folded into the crate type.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// The conversation as sent upstream: system prompt, bounded history,
/// then the new user message.
#[derive(Debug, Clone)]
pub struct ChatPrompt {
    pub system: String,
    pub history: Vec<Turn>,
    pub user: String,
}

impl ChatPrompt {
    /// Flatten into the OpenAI-style `messages` array.
    pub fn messages(&self) -> Vec<serde_json::Value> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(serde_json::json!({
            "role": "system",
            "content": self.system,
        }));
        for turn in &self.history {
            messages.push(serde_json::json!({
                "role": turn.role.as_str(),
                "content": turn.content,
            }));
        }
        messages.push(serde_json::json!({
            "role": "user",
            "content": self.user,
        }));
        messages
    }
}

/// Per-call generation parameters.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    /// Per-attempt deadline. Expiry cancels the in-flight call.
    pub timeout: Duration,
}

impl From<&UpstreamConfig> for CompletionOptions {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            timeout: config.timeout(),
        }
    }
}

/// One attempt against the completion endpoint with a given credential.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Non-streaming call. Returns the extracted reply text.
    async fn complete(
        &self,
        key: &ApiKey,
        prompt: &ChatPrompt,
        options: &CompletionOptions,
    ) -> Result<String>;

    /// Streaming call. Returns the raw SSE byte stream once the response
    /// headers are in; fragment parsing happens in the relay.
    async fn open_stream(
        &self,
        key: &ApiKey,
        prompt: &ChatPrompt,
        options: &CompletionOptions,
    ) -> Result<ByteStream>;
}

/// Production client over a shared `reqwest::Client`.
pub struct HttpCompletionClient {
    http: reqwest::Client,
    url: String,
}

impl HttpCompletionClient {
    pub fn new(http: reqwest::Client, url: String) -> Self {
        Self { http, url }
    }

    fn body(prompt: &ChatPrompt, options: &CompletionOptions, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": options.model,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "top_p": options.top_p,
            "messages": prompt.messages(),
        });
        if stream {
            body["stream"] = serde_json::Value::Bool(true);
        }
        body
    }

    async fn send(
        &self,
        key: &ApiKey,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(key.expose_secret())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamStatus(status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(
        &self,
        key: &ApiKey,
        prompt: &ChatPrompt,
        options: &CompletionOptions,
    ) -> Result<String> {
        let body = Self::body(prompt, options, false);

        // Dropping the future on expiry cancels the in-flight request.
        let call = async {
            let response = self.send(key, &body).await?;
            let parsed: serde_json::Value = response.json().await?;
            extract_reply(&parsed)
        };

        match tokio::time::timeout(options.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn open_stream(
        &self,
        key: &ApiKey,
        prompt: &ChatPrompt,
        options: &CompletionOptions,
    ) -> Result<ByteStream> {
        let body = Self::body(prompt, options, true);

        // The deadline covers establishing the stream; fragment delivery
        // afterwards is paced by the upstream.
        let response = match tokio::time::timeout(options.timeout, self.send(key, &body)).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::Timeout),
        };

        Ok(Box::pin(response.bytes_stream().map_err(Error::from)))
    }
}

/// Pull the generated text out of a non-streaming response body.
///
/// A success status whose body has no extractable, non-blank message text
/// is an `EmptyResponse` (retried like any other attempt failure).
fn extract_reply(response: &serde_json::Value) -> Result<String> {
    let content = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    if content.trim().is_empty() {
        return Err(Error::EmptyResponse);
    }
    Ok(content.to_string())
}
