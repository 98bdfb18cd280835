//! Core types for the colloquy conversation client.
//!
//! This crate holds everything the runtime crate and host applications
//! share: the JSON wire protocol spoken over the session channel, the
//! construction-time configuration surface, and the capability ports
//! behind which all platform concerns (sockets, microphones, speakers,
//! storage, auth) live.

pub mod config;
pub mod ports;
pub mod protocol;

// Re-export commonly used types for convenience
pub use config::{
    ClientOptions, InputCapabilities, OutputCapabilities, RecordingConfig, VoiceProfile,
};
pub use ports::{
    AudioDecoder, AudioError, ChannelError, Connector, KeyValueStore, MemoryKeyValueStore,
    MessageChannel, MicrophoneSource, PcmBuffer, PlaybackClock, PlaybackSink, StaticTokenProvider,
    StorageError, TokenError, TokenProvider,
};
pub use protocol::{
    AudioConfig, InteractParams, InteractionEvent, RequestEnvelope, RequestMode, RequestPayload,
    ServerBody, ServerEnvelope, SessionConfig, SubtitleCue, SubtitleWord,
};
