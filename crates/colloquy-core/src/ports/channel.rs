//! Bidirectional text channel port.

use async_trait::async_trait;

/// Errors surfaced by the message channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The connection could not be established.
    #[error("failed to connect: {0}")]
    Connect(String),

    /// The channel closed while a send or receive was outstanding.
    #[error("channel closed")]
    Closed,

    /// A channel-level transport fault.
    #[error("channel error: {0}")]
    Transport(String),
}

/// A connected, bidirectional, message-oriented text channel.
///
/// The runtime drives a channel from a single task, so methods take
/// `&mut self`. One envelope is one text message; no framing beyond
/// message boundaries is assumed.
#[async_trait]
pub trait MessageChannel: Send {
    /// Send one text message.
    async fn send(&mut self, text: String) -> Result<(), ChannelError>;

    /// Receive the next text message.
    ///
    /// Returns `None` on clean remote close, `Some(Err(_))` on a channel
    /// fault.
    async fn recv(&mut self) -> Option<Result<String, ChannelError>>;

    /// Close the channel, flushing any pending frames.
    async fn close(&mut self);
}

/// Establishes message channels to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a channel to `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn MessageChannel>, ChannelError>;
}
