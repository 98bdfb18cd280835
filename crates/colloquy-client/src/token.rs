//! Access-token caching over the key-value storage port.
//!
//! The auth endpoint issues bearer tokens that stay valid for roughly an
//! hour; fetching one per connect is wasteful, so the token is persisted
//! wrapped as `{value, expiry}` and reused until shortly before it
//! expires.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use colloquy_core::ports::{KeyValueStore, TokenError, TokenProvider};
use serde::{Deserialize, Serialize};

/// Storage key for the wrapped token.
const TOKEN_KEY: &str = "colloquy.access_token";

/// Tokens are reused for 55 minutes, leaving headroom before the
/// server-side expiry.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(55 * 60);

/// The persisted wrapper.
#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    value: String,

    /// Expiry as unix milliseconds.
    expiry: i64,
}

/// A [`TokenProvider`] that caches the inner provider's tokens in a
/// key-value store with a TTL.
pub struct CachedTokenProvider {
    inner: Arc<dyn TokenProvider>,
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl CachedTokenProvider {
    #[must_use]
    pub fn new(inner: Arc<dyn TokenProvider>, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_ttl(inner, store, DEFAULT_TOKEN_TTL)
    }

    #[must_use]
    pub fn with_ttl(
        inner: Arc<dyn TokenProvider>,
        store: Arc<dyn KeyValueStore>,
        ttl: Duration,
    ) -> Self {
        Self { inner, store, ttl }
    }

    /// Drop the cached token, forcing a fresh fetch on next use.
    pub async fn clear(&self) {
        if let Err(e) = self.store.remove(TOKEN_KEY).await {
            tracing::warn!(error = %e, "failed to clear cached token");
        }
    }

    async fn cached(&self) -> Option<String> {
        let raw = match self.store.get(TOKEN_KEY).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, "token cache read failed");
                return None;
            }
        };

        let stored: StoredToken = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "cached token is corrupt, discarding");
                if let Err(e) = self.store.remove(TOKEN_KEY).await {
                    tracing::warn!(error = %e, "failed to remove corrupt token");
                }
                return None;
            }
        };

        if stored.expiry <= Utc::now().timestamp_millis() {
            tracing::debug!("cached token expired");
            return None;
        }
        Some(stored.value)
    }
}

#[async_trait]
impl TokenProvider for CachedTokenProvider {
    async fn access_token(&self) -> Result<String, TokenError> {
        if let Some(token) = self.cached().await {
            tracing::debug!("using cached access token");
            return Ok(token);
        }

        let token = self.inner.access_token().await?;

        #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
        let expiry = Utc::now().timestamp_millis() + self.ttl.as_millis() as i64;
        let stored = StoredToken {
            value: token.clone(),
            expiry,
        };
        match serde_json::to_string(&stored) {
            Ok(json) => {
                // Best effort: a token that cannot be cached still works.
                if let Err(e) = self.store.set(TOKEN_KEY, &json).await {
                    tracing::warn!(error = %e, "failed to cache access token");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize token wrapper"),
        }

        Ok(token)
    }
}
