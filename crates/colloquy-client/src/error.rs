//! Client error types.

use std::time::Duration;

use colloquy_core::ports::{AudioError, ChannelError, StorageError, TokenError};

/// Coarse error classification surfaced to the host alongside the
/// `error` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Microphone acquisition failed or was refused.
    MicDenied,

    /// A request timed out, or the transport was not ready when needed.
    NetworkTimeout,

    /// The channel reported a transport-level fault.
    NetworkError,

    /// The server answered with an error, or initialization failed.
    ServerError,

    /// Playable audio buffers could not be established.
    DecodeError,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MicDenied => "mic_denied",
            Self::NetworkTimeout => "network_timeout",
            Self::NetworkError => "network_error",
            Self::ServerError => "server_error",
            Self::DecodeError => "decode_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the conversation client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Microphone acquisition failed or was refused.
    #[error("microphone unavailable: {source}")]
    MicrophoneDenied {
        #[source]
        source: AudioError,
    },

    /// A pending request's timer fired before the server replied.
    #[error("request '{kind}' timed out after {after:?}")]
    RequestTimeout {
        kind: &'static str,
        after: Duration,
    },

    /// The channel reported a fault.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The server answered with `kind: error`.
    #[error("server error: {message}")]
    Server { message: String },

    /// The player failed to establish playable buffers.
    #[error("audio decode failed: {message}")]
    Decode { message: String },

    /// The bearer token could not be obtained.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Persisted storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// An operation requires a live transport and there is none.
    #[error("transport is not connected")]
    NotConnected,

    /// The runtime task has shut down.
    #[error("conversation runtime has shut down")]
    RuntimeGone,

    /// The operation does not apply in the current conversation state.
    #[error("'{operation}' is invalid in state '{state}'")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
}

impl ClientError {
    /// Classify this error for the host's error hook.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MicrophoneDenied { .. } => ErrorKind::MicDenied,
            Self::RequestTimeout { .. } | Self::NotConnected => ErrorKind::NetworkTimeout,
            Self::Channel(_) | Self::RuntimeGone => ErrorKind::NetworkError,
            Self::Server { .. }
            | Self::Token(_)
            | Self::Storage(_)
            | Self::InvalidState { .. } => ErrorKind::ServerError,
            Self::Decode { .. } => ErrorKind::DecodeError,
        }
    }
}
