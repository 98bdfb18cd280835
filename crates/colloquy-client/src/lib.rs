//! Client runtime for full-duplex voice-and-text conversation with a
//! remote assistant service.
//!
//! The runtime captures microphone audio, detects speech boundaries,
//! streams encoded audio to the server over a persistent bidirectional
//! session, plays the interleaved audio the server sends back, and
//! coordinates the whole as a turn-taking state machine with barge-in,
//! push-to-talk, text-only input, pause/resume, and error recovery.
//!
//! Construction follows the capability-port model: the host supplies
//! [`ClientDeps`](orchestrator::ClientDeps) (channel connector,
//! microphone, playback sink/clock, decoder, token provider) and
//! receives a [`ConversationClient`](orchestrator::ConversationClient)
//! handle plus an event channel. The [`adapters`] module has local
//! implementations for desktop hosts.

pub mod adapters;
pub mod capture;
pub mod error;
pub mod events;
pub mod frame;
pub mod input;
pub mod orchestrator;
pub mod player;
pub mod session;
pub mod token;
pub mod vad;

// Re-export key types for convenience
pub use error::{ClientError, ErrorKind};
pub use events::ClientEvent;
pub use orchestrator::{ClientDeps, ConversationClient, ConversationState};
pub use player::PlayerEvent;
pub use session::{SessionTransport, TransportEvent};
pub use token::CachedTokenProvider;

// Re-export the shared core crate so hosts need only one dependency.
pub use colloquy_core as core;
