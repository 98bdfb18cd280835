//! Events emitted to the host application.

use colloquy_core::protocol::SubtitleCue;

use crate::error::ErrorKind;
use crate::orchestrator::ConversationState;

/// Events delivered to the host over the client's event channel.
///
/// These are the external sinks of the runtime: everything the host
/// renders (text, subtitles, images, avatar cues) or reacts to (state
/// changes, connectivity, errors) arrives here.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The conversation state machine moved.
    StateChanged {
        old: ConversationState,
        new: ConversationState,
    },

    /// The session handshake completed and the channel is ready.
    Connected,

    /// Incremental assistant response text.
    Text { content: String },

    /// A freeform notice from the server (utility output and the like).
    Message { text: String },

    /// The subtitle track for the current utterance changed.
    SubtitlesChanged { cues: Vec<SubtitleCue> },

    /// A subtitle word should be highlighted.
    SubtitleHighlight { cue: usize, word: usize },

    /// The displayed image should change.
    ImageChanged { url: String },

    /// The avatar should play the named animation.
    AvatarAnimation { name: String },

    /// A fault occurred; `kind` matches the error taxonomy.
    Error { kind: ErrorKind, message: String },
}
