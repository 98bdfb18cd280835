//! Wire protocol for the conversation service.
//!
//! The service speaks newline-free JSON envelopes over a single
//! bidirectional text channel. Every envelope carries a `uid` correlation
//! identifier (client-chosen on requests, echoed by the server on every
//! message pertaining to that request), and client envelopes carry a
//! `client_start_time` ISO-8601 timestamp. Routing is driven entirely by
//! the `kind` discriminator, and within an `interact` stream by the
//! nested `event` discriminator.

mod envelope;
mod event;
mod request;

pub use envelope::{RequestEnvelope, RequestMode, ServerBody, ServerEnvelope};
pub use event::{InteractionEvent, SubtitleCue, SubtitleWord};
pub use request::{AudioConfig, InteractParams, RequestPayload, SessionConfig};
