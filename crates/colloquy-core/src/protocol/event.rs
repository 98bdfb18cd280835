//! Events carried by an `interact` response stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One subtitle cue with optional per-word timing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleCue {
    /// Display text of the cue.
    pub text: String,

    /// Offset from the start of the utterance, in milliseconds.
    #[serde(default)]
    pub start_ms: u64,

    /// End offset in milliseconds, when the server provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<u64>,

    /// Word-level timing for highlight tracking.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<SubtitleWord>,
}

/// A single timed word inside a subtitle cue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleWord {
    /// The word as displayed.
    pub word: String,

    /// Offset from the start of the utterance, in milliseconds.
    pub start_ms: u64,
}

/// Server events inside an `interact` stream, discriminated by `event`.
///
/// A single dialogue turn produces `interaction_started`, then interleaved
/// `text`/`audio`/`subtitles`/`viseme`/`image` events, then
/// `text_complete` and `audio_complete`, and finally
/// `interaction_complete`. Errors inside the turn surface as
/// `interaction_error` without necessarily ending the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InteractionEvent {
    /// The server has begun producing this turn.
    InteractionStarted,

    /// Incremental response text.
    Text { text: String },

    /// No more text will arrive for this turn.
    TextComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },

    /// A base64-encoded compressed audio chunk.
    Audio { audio: String },

    /// No more audio will arrive for this turn.
    AudioComplete,

    /// Structured side-channel data from a utility.
    Data {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },

    /// The displayed image should change.
    Image {
        #[serde(default, alias = "image", skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },

    /// Subtitle cues for the current utterance.
    Subtitles { subtitles: Vec<SubtitleCue> },

    /// Mouth-shape cue for avatar animation.
    Viseme {
        viseme: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset_ms: Option<u64>,
    },

    /// A recoverable error occurred while producing this turn.
    InteractionError {
        #[serde(default, alias = "message")]
        error: String,
    },

    /// The turn is finished; the client may commit the next one.
    InteractionComplete,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_event_round_trips() {
        let json = r#"{"event":"audio","audio":"//NExAA="}"#;
        let event: InteractionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            InteractionEvent::Audio {
                audio: "//NExAA=".to_string()
            }
        );
    }

    #[test]
    fn image_event_accepts_image_alias() {
        let json = r#"{"event":"image","image":"https://example.com/a.png"}"#;
        let event: InteractionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            InteractionEvent::Image {
                url: Some("https://example.com/a.png".to_string())
            }
        );
    }

    #[test]
    fn subtitles_carry_word_timing() {
        let json = r#"{
            "event": "subtitles",
            "subtitles": [
                {"text": "hello there", "start_ms": 0,
                 "words": [{"word": "hello", "start_ms": 0}, {"word": "there", "start_ms": 380}]}
            ]
        }"#;
        let event: InteractionEvent = serde_json::from_str(json).unwrap();
        let InteractionEvent::Subtitles { subtitles } = event else {
            panic!("expected subtitles event");
        };
        assert_eq!(subtitles.len(), 1);
        assert_eq!(subtitles[0].words[1].word, "there");
        assert_eq!(subtitles[0].words[1].start_ms, 380);
    }

    #[test]
    fn interaction_complete_is_a_bare_tag() {
        let event: InteractionEvent =
            serde_json::from_str(r#"{"event":"interaction_complete"}"#).unwrap();
        assert_eq!(event, InteractionEvent::InteractionComplete);
    }
}
