//! Capability ports.
//!
//! Every platform-facing dependency of the runtime is expressed as an
//! object-safe trait here, so the orchestration core never constructs a
//! sibling component directly and tests can substitute recording mocks.
//! Methods take `&self`; implementations use interior mutability
//! (channels, atomic flags) for state changes.

pub mod audio;
pub mod auth;
pub mod channel;
pub mod storage;

pub use audio::{AudioDecoder, AudioError, MicrophoneSource, PcmBuffer, PlaybackClock, PlaybackSink};
pub use auth::{StaticTokenProvider, TokenError, TokenProvider};
pub use channel::{ChannelError, Connector, MessageChannel};
pub use storage::{KeyValueStore, MemoryKeyValueStore, StorageError};
