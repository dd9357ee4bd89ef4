//! Configuration parsing and validation for papo.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub session: SessionConfig,
    pub jobs: JobsConfig,
    pub admin: AdminConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:3000")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// The inner `SecretString` ensures the key value is:
/// - Zeroized in memory when dropped
/// - Never exposed via Debug or Display
/// - Only accessible via `.expose_secret()` (grep-auditable)
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value. Every call site is auditable via `grep expose_secret`.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// Upstream completion endpoint configuration.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Full URL of the chat-completion endpoint.
    pub url: String,
    /// Model name sent with every request.
    pub model: String,
    /// Ordered credential pool. Handed out round-robin.
    pub api_keys: Vec<ApiKey>,
    /// System prompt prepended to every conversation.
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    /// Per-attempt deadline in seconds.
    pub timeout_secs: u64,
    /// Upper bound on dispatch attempts; effective cap is min(this, pool size).
    pub attempt_cap: u32,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Default system prompt: short, direct pt-BR answers with markdown emphasis.
fn default_system_prompt() -> String {
    "Você é um assistente de chat.\n\
     \n\
     REGRAS OBRIGATÓRIAS:\n\
     - Responda SEMPRE em PORTUGUÊS DO BRASIL.\n\
     - Nunca use espanhol ou qualquer outro idioma.\n\
     - Use parágrafos curtos.\n\
     - Use **negrito** para títulos ou pontos importantes.\n\
     - Pule linhas para facilitar a leitura.\n\
     - Seja direto, claro e objetivo.\n\
     - Não use emojis.\n"
        .to_string()
}

fn default_max_tokens() -> u32 {
    300
}

fn default_temperature() -> f32 {
    0.35
}

fn default_top_p() -> f32 {
    0.9
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_attempt_cap() -> u32 {
    3
}

/// Session memory configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Maximum turns kept per session; oldest turns are evicted first.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

fn default_max_turns() -> usize {
    6
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

/// Job registry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// How long a completed job result stays available for polling.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// How often the background sweeper purges expired jobs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_retention_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    30
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl JobsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Admin gate configuration.
#[derive(Debug, Clone, Default)]
pub struct AdminConfig {
    /// Shared secret compared against the `x-admin-key` header.
    /// When absent, admin endpoints reject every request.
    pub secret: Option<ApiKey>,
}

/// Audit sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Path of the append-only JSONL exchange log.
    #[serde(default = "default_audit_path")]
    pub path: String,
}

fn default_audit_path() -> String {
    "./papo.log.jsonl".to_string()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set: {message}")]
    EnvVar { var: String, message: String },
}

/// Raw upstream config deserialized directly from TOML.
/// Secret values may contain `${VAR}` references not yet expanded.
#[derive(Deserialize)]
struct RawUpstreamConfig {
    url: String,
    model: String,
    #[serde(default)]
    api_keys: Vec<String>,
    #[serde(default = "default_system_prompt")]
    system_prompt: String,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_top_p")]
    top_p: f32,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    #[serde(default = "default_attempt_cap")]
    attempt_cap: u32,
}

#[derive(Deserialize, Default)]
struct RawAdminConfig {
    secret: Option<String>,
}

/// Raw configuration deserialized directly from TOML.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    upstream: RawUpstreamConfig,
    #[serde(default)]
    session: SessionConfig,
    #[serde(default)]
    jobs: JobsConfig,
    #[serde(default)]
    admin: RawAdminConfig,
    #[serde(default)]
    audit: AuditConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// The closure-based design makes this testable without touching global env state.
/// Supports multiple `${VAR}` in one string. Fails on first missing variable,
/// unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            message: format!("Environment variable '{}' is not set", var_name),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Expand all `${VAR}` references in a string using real environment variables.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    expand_env_vars_with(input, |name| std::env::var(name).ok())
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Parse configuration from a TOML string, expanding `${VAR}` references
    /// in secret values.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content)?;
        let config = Self::from_raw(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Convert raw (deserialized) config to final config with env var expansion.
    ///
    /// Only secret-bearing fields (`upstream.api_keys`, `admin.secret`) are
    /// expanded; everything else passes through literally.
    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let mut api_keys = Vec::with_capacity(raw.upstream.api_keys.len());
        for key in &raw.upstream.api_keys {
            api_keys.push(ApiKey::from(expand_env_vars(key)?));
        }

        let secret = match raw.admin.secret {
            Some(ref s) => Some(ApiKey::from(expand_env_vars(s)?)),
            None => None,
        };

        Ok(Config {
            server: raw.server,
            upstream: UpstreamConfig {
                url: raw.upstream.url,
                model: raw.upstream.model,
                api_keys,
                system_prompt: raw.upstream.system_prompt,
                max_tokens: raw.upstream.max_tokens,
                temperature: raw.upstream.temperature,
                top_p: raw.upstream.top_p,
                timeout_secs: raw.upstream.timeout_secs,
                attempt_cap: raw.upstream.attempt_cap,
            },
            session: raw.session,
            jobs: raw.jobs,
            admin: AdminConfig { secret },
            audit: raw.audit,
            logging: raw.logging,
        })
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.url.is_empty() {
            return Err(ConfigError::Validation("Upstream URL is empty".into()));
        }

        if self.upstream.api_keys.is_empty() {
            return Err(ConfigError::Validation(
                "No upstream API keys configured - the gateway cannot dispatch".into(),
            ));
        }

        if self
            .upstream
            .api_keys
            .iter()
            .any(|k| k.expose_secret().trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "Upstream API key is empty".into(),
            ));
        }

        if self.upstream.attempt_cap == 0 {
            return Err(ConfigError::Validation("attempt_cap must be >= 1".into()));
        }

        if self.session.max_turns < 2 {
            return Err(ConfigError::Validation(
                "session.max_turns must be >= 2 (one user/assistant pair)".into(),
            ));
        }

        if self.admin.secret.is_none() {
            tracing::warn!("No admin secret configured - admin endpoints are disabled");
        }

        Ok(())
    }
}
