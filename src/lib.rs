//! papo - resilient chat gateway for OpenAI-style completion upstreams
//!
//! This library provides the core functionality for the papo gateway:
//! credential rotation, retry/failover dispatch, session memory, async job
//! tracking, streaming relay and reply sanitization.

pub mod config;
pub mod error;
pub mod gateway;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
