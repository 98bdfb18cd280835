//! Client → server request payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::VoiceProfile;

/// Fixed transport format for streamed microphone audio.
///
/// The server consumes a continuous compressed byte stream; chunks are
/// concatenation-safe at the byte level and frame boundaries are not
/// guaranteed to align with chunk boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sampling rate of the encoded stream in Hz.
    pub sampling_rate: u32,

    /// MIME type of the encoded stream.
    pub mime_type: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 48_000,
            mime_type: "audio/mpeg".to_string(),
        }
    }
}

/// Session configuration sent during the handshake (`set_configuration`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// System prompt driving the assistant's behaviour.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Sampling temperature override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Server-side utilities available to the assistant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilities: Option<Value>,

    /// Synthesis voice parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_profile: Option<VoiceProfile>,
}

/// Parameters for an `interact` stream request.
///
/// All fields are optional; an audio-driven turn sends none of them and
/// lets the server consume the audio accumulated via `add_audio`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractParams {
    /// Text input for this turn (text-only mode, or the priming trigger).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Restrict the turn to utterances from these speakers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speakers: Option<Vec<String>>,

    /// Arbitrary context merged into the prompt rendering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// Utility to run before the turn, blocking the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_input: Option<Value>,

    /// Utility to run before the turn without blocking the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_input_non_blocking: Option<Value>,

    /// Utility to run on the assistant's output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_output: Option<Value>,

    /// Whether the server should synthesize audio for the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_output: Option<bool>,

    /// BCP-47 language code for transcription and synthesis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

impl InteractParams {
    /// A text-driven turn.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// The full client request catalog, discriminated by `kind` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestPayload {
    /// Present the bearer token obtained out-of-band.
    Authenticate { access_token: String },

    /// Replace the session configuration.
    SetConfiguration { config: SessionConfig },

    /// Merge stored configuration references into the session.
    MergeConfiguration {
        #[serde(skip_serializing_if = "Option::is_none")]
        references: Option<Vec<String>>,
    },

    /// Fetch the effective session configuration.
    GetConfiguration,

    /// Render the prompt template against a context without interacting.
    RenderPrompt {
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
    },

    /// Append a base64-encoded compressed audio chunk to the input buffer.
    AddAudio { audio: String, config: AudioConfig },

    /// Discard all audio accumulated since the last turn.
    ClearAudio,

    /// Ask the server whether the user's turn has ended.
    CheckTurn,

    /// Transcribe the accumulated audio without interacting.
    Transcribe {
        #[serde(skip_serializing_if = "Option::is_none")]
        language_code: Option<String>,
    },

    /// Register keywords for detection in user speech.
    AddKeywords { keywords: Vec<String> },

    /// Remove all registered keywords.
    RemoveKeywords,

    /// Detect registered keywords in the accumulated audio.
    DetectKeywords,

    /// Enroll a speaker from a reference sample.
    AddSpeaker { speaker: String, audio: String },

    /// Remove all enrolled speakers.
    RemoveSpeakers,

    /// Identify enrolled speakers in the accumulated audio.
    DetectSpeakers,

    /// Run one dialogue turn; the response is a stream of events.
    Interact(InteractParams),

    /// Cut short the interaction identified by `target_uid`.
    Interrupt {
        target_uid: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        at_character: Option<u32>,
    },

    /// Invoke server-side utilities outside of a dialogue turn.
    Run {
        #[serde(skip_serializing_if = "Option::is_none")]
        utilities: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        bindings: Option<Value>,
    },

    /// Keepalive.
    Ping,
}

impl RequestPayload {
    /// The wire `kind` discriminator, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::SetConfiguration { .. } => "set_configuration",
            Self::MergeConfiguration { .. } => "merge_configuration",
            Self::GetConfiguration => "get_configuration",
            Self::RenderPrompt { .. } => "render_prompt",
            Self::AddAudio { .. } => "add_audio",
            Self::ClearAudio => "clear_audio",
            Self::CheckTurn => "check_turn",
            Self::Transcribe { .. } => "transcribe",
            Self::AddKeywords { .. } => "add_keywords",
            Self::RemoveKeywords => "remove_keywords",
            Self::DetectKeywords => "detect_keywords",
            Self::AddSpeaker { .. } => "add_speaker",
            Self::RemoveSpeakers => "remove_speakers",
            Self::DetectSpeakers => "detect_speakers",
            Self::Interact(_) => "interact",
            Self::Interrupt { .. } => "interrupt",
            Self::Run { .. } => "run",
            Self::Ping => "ping",
        }
    }
}
