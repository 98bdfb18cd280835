//! Access-token acquisition port.
//!
//! The actual exchange of an API key and federated identity for a bearer
//! token happens against an HTTP endpoint the host already talks to; the
//! runtime only needs something that yields a current token on demand.

use async_trait::async_trait;

/// Errors surfaced while obtaining a bearer token.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The provider could not produce a token.
    #[error("failed to obtain access token: {source}")]
    Fetch {
        #[source]
        source: anyhow::Error,
    },
}

/// Yields the bearer token presented during the `authenticate` handshake.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, TokenError>;
}

/// A provider that always returns the same token.
///
/// Useful for tests and for hosts that manage token refresh themselves.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, TokenError> {
        Ok(self.token.clone())
    }
}
