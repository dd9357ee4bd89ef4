//! Round-robin credential pool for upstream API keys.
//!
//! Rotation is deliberately health-blind: every acquisition returns the key
//! at the cursor and advances it, regardless of how the previous attempt
//! with that key went. The dispatch retry loop walks past bad keys on its
//! own, so the pool stays a single atomic counter.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::ApiKey;
use crate::error::{Error, Result};

/// Ordered pool of upstream credentials with an atomic rotation cursor.
pub struct KeyPool {
    keys: Vec<ApiKey>,
    cursor: AtomicUsize,
}

impl KeyPool {
    /// Build a pool from configured keys.
    ///
    /// An empty pool is a configuration-time fatal condition: the gateway
    /// must refuse to start rather than fail per-request.
    pub fn new(keys: Vec<ApiKey>) -> Result<Self> {
        if keys.is_empty() {
            return Err(Error::PoolExhausted);
        }
        Ok(Self {
            keys,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Hand out the next credential, strict round-robin.
    ///
    /// The returned index identifies the key's position in the configured
    /// sequence; it is what audit records carry instead of the key itself.
    /// `fetch_add` makes concurrent acquisitions each observe a distinct
    /// cursor value, so no key is skipped or handed out twice per cycle.
    pub fn acquire(&self) -> (usize, ApiKey) {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        (index, self.keys[index].clone())
    }

    /// Number of credentials in the pool. Never changes after startup.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
