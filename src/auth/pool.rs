//! Gate check and upstream key selection.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::config::{ApiKey, AuthConfig, PoolStrategy};
use crate::error::{Error, Result};

/// Set of interchangeable upstream keys.
#[derive(Debug)]
pub struct KeyPool {
    keys: Vec<ApiKey>,
    strategy: PoolStrategy,
    cursor: AtomicUsize,
}

impl KeyPool {
    pub fn new(keys: Vec<ApiKey>, strategy: PoolStrategy) -> Self {
        Self {
            keys,
            strategy,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Pick the index of the next key to use, or `None` if the pool is empty.
    pub fn pick_index(&self) -> Option<usize> {
        if self.keys.is_empty() {
            return None;
        }
        let index = match self.strategy {
            PoolStrategy::Random => rand::thread_rng().gen_range(0..self.keys.len()),
            PoolStrategy::RoundRobin => {
                self.cursor.fetch_add(1, Ordering::Relaxed) % self.keys.len()
            }
        };
        Some(index)
    }

    /// Pick the next key along with its pool index.
    pub fn pick(&self) -> Option<(usize, &ApiKey)> {
        let index = self.pick_index()?;
        Some((index, &self.keys[index]))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn strategy(&self) -> PoolStrategy {
        self.strategy
    }
}

/// Key the upstream call is made with.
#[derive(Clone)]
pub struct UpstreamCredential {
    key: String,
    /// Pool slot the key came from; `None` when the client's own key is forwarded.
    pub pool_index: Option<usize>,
}

impl UpstreamCredential {
    pub fn expose_secret(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for UpstreamCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamCredential")
            .field("key", &"[REDACTED]")
            .field("pool_index", &self.pool_index)
            .finish()
    }
}

/// Decides whether a client may pass and which key it is forwarded with.
#[derive(Debug)]
pub struct Gatekeeper {
    gate: Option<ApiKey>,
    pool: KeyPool,
}

impl Gatekeeper {
    pub fn new(gate: Option<ApiKey>, pool: KeyPool) -> Self {
        Self { gate, pool }
    }

    pub fn from_config(auth: &AuthConfig) -> Self {
        Self::new(
            auth.gate_key.clone(),
            KeyPool::new(auth.keys.clone(), auth.strategy),
        )
    }

    /// Turn the client's credential into the upstream credential.
    ///
    /// Without a gate the client's key is forwarded unchanged. With a gate the
    /// client's key must match it and a pool key is used instead.
    pub fn authorize(&self, inbound: Option<&str>) -> Result<UpstreamCredential> {
        let inbound = inbound.ok_or_else(|| {
            Error::Unauthenticated(
                "Missing API key: pass it via 'Authorization: Bearer', 'x-goog-api-key', 'x-api-key' or '?key='"
                    .to_string(),
            )
        })?;

        let Some(gate) = &self.gate else {
            return Ok(UpstreamCredential {
                key: inbound.to_string(),
                pool_index: None,
            });
        };

        if !gate.matches(inbound) {
            tracing::warn!("Rejected request with invalid API key");
            return Err(Error::Unauthenticated("Invalid API key".to_string()));
        }

        let (index, key) = self
            .pool
            .pick()
            .ok_or_else(|| Error::Internal("No upstream keys configured".to_string()))?;

        tracing::debug!(
            pool_index = index,
            pool_size = self.pool.len(),
            strategy = %self.pool.strategy(),
            "Selected upstream key"
        );

        Ok(UpstreamCredential {
            key: key.expose_secret().to_string(),
            pool_index: Some(index),
        })
    }

    pub fn is_gated(&self) -> bool {
        self.gate.is_some()
    }

    pub fn pool(&self) -> &KeyPool {
        &self.pool
    }
}
