//! Resilient dispatch core.
//!
//! Everything between an inbound chat message and the upstream completion
//! endpoint lives here: credential rotation, retry/failover, session
//! memory, async job tracking, streaming relay, sanitization and the
//! fire-and-forget audit sink.

pub mod audit;
pub mod client;
pub mod dispatch;
pub mod jobs;
pub mod keys;
pub mod sanitize;
pub mod session;
pub mod stream;

pub use dispatch::{Dispatcher, ModeGate, ServiceMode};
pub use jobs::{JobRegistry, JobStatus};
pub use keys::KeyPool;
pub use sanitize::Sanitizer;
pub use session::{SessionStore, Turn};

/// Where a request came from. Opaque to the core; carried into job
/// records and audit lines.
#[derive(Debug, Clone, Default)]
pub struct RequesterInfo {
    pub ip: String,
    pub user_agent: String,
}
