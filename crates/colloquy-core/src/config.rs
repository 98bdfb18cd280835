//! Construction-time client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Synthesis voice parameters forwarded to the server.
///
/// Out-of-range values are clamped client-side; the server may apply its
/// own validation on top.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    /// Identifier of the synthesis voice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,

    /// Speaking rate multiplier, clamped to `[0.7, 1.2]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,

    /// Voice stability, clamped to `[0.0, 1.0]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stability: Option<f32>,

    /// Similarity boost, clamped to `[0.0, 1.0]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_boost: Option<f32>,
}

impl VoiceProfile {
    /// Clamp all numeric fields into their documented ranges.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            voice_id: self.voice_id,
            speed: self.speed.map(|v| v.clamp(0.7, 1.2)),
            stability: self.stability.map(|v| v.clamp(0.0, 1.0)),
            similarity_boost: self.similarity_boost.map(|v| v.clamp(0.0, 1.0)),
        }
    }
}

/// Which output surfaces the host renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputCapabilities {
    pub audio: bool,
    pub subtitles: bool,
    pub avatar: bool,
}

impl Default for OutputCapabilities {
    fn default() -> Self {
        Self {
            audio: true,
            subtitles: true,
            avatar: false,
        }
    }
}

/// Which input paths are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputCapabilities {
    pub audio: bool,
    pub text: bool,
}

impl Default for InputCapabilities {
    fn default() -> Self {
        Self {
            audio: true,
            text: true,
        }
    }
}

/// Microphone acquisition constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Everything the host supplies when constructing a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// WebSocket endpoint of the conversation service.
    pub api_url: String,

    /// API key identifying the host application.
    pub api_key: String,

    /// Federated end-user identity presented during token exchange.
    pub federated_id: Option<String>,

    /// System prompt for the session.
    pub prompt: String,

    /// Arbitrary context merged into prompt rendering.
    pub context: Option<Value>,

    /// Synthesis voice parameters.
    pub voice_profile: Option<VoiceProfile>,

    /// Server-side utilities configured for the session.
    pub utilities: Option<Value>,

    pub capabilities: OutputCapabilities,

    pub input_capabilities: InputCapabilities,

    pub recording: RecordingConfig,

    /// Text sent as the opening `interact` so the server produces its
    /// greeting without waiting for user input.
    pub greeting_trigger: String,

    /// Per-request reply deadline.
    pub request_timeout: Duration,

    /// Interval between keepalive pings, when enabled.
    pub keepalive_interval: Option<Duration>,
}

impl ClientOptions {
    /// Options for the given endpoint, key, and prompt; everything else
    /// at its default.
    #[must_use]
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            federated_id: None,
            prompt: prompt.into(),
            context: None,
            voice_profile: None,
            utilities: None,
            capabilities: OutputCapabilities::default(),
            input_capabilities: InputCapabilities::default(),
            recording: RecordingConfig::default(),
            greeting_trigger: ".".to_string(),
            request_timeout: Duration::from_secs(50),
            keepalive_interval: None,
        }
    }
}
