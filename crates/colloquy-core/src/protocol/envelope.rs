//! Message envelopes for both directions of the channel.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::event::InteractionEvent;
use super::request::RequestPayload;

/// Whether a request expects a single reply or a stream of messages
/// terminated by a `close` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMode {
    Request,
    Stream,
}

/// An outgoing client envelope.
///
/// The `uid` is freshly generated per request and echoed by the server on
/// every response pertaining to it; `client_start_time` is stamped at
/// construction in ISO-8601 UTC.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    pub uid: Uuid,

    #[serde(rename = "type")]
    pub mode: RequestMode,

    pub client_start_time: String,

    #[serde(flatten)]
    pub payload: RequestPayload,
}

impl RequestEnvelope {
    /// Wrap a payload with a fresh uid and the current timestamp.
    #[must_use]
    pub fn new(mode: RequestMode, payload: RequestPayload) -> Self {
        Self {
            uid: Uuid::new_v4(),
            mode,
            client_start_time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            payload,
        }
    }
}

/// An incoming server envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEnvelope {
    /// Echo of the originating request's uid. Server-initiated messages
    /// may omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_start_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_end_time: Option<String>,

    #[serde(flatten)]
    pub body: ServerBody,
}

/// Server message bodies, discriminated by `kind`.
///
/// Each request kind is echoed back as a response of the same kind;
/// `interact` responses additionally carry a nested `event`
/// discriminator, and a stream ends with `close`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerBody {
    Authenticate,

    SetConfiguration,

    MergeConfiguration,

    GetConfiguration {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config: Option<Value>,
    },

    RenderPrompt {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },

    AddAudio,

    ClearAudio,

    CheckTurn {
        #[serde(default)]
        is_user_still_speaking: bool,
    },

    Transcribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },

    AddKeywords,

    RemoveKeywords,

    DetectKeywords {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        keywords: Vec<String>,
    },

    AddSpeaker,

    RemoveSpeakers,

    DetectSpeakers {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        speakers: Vec<Value>,
    },

    /// One event of an `interact` stream.
    Interact {
        #[serde(flatten)]
        event: InteractionEvent,
    },

    Interrupt,

    Run {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },

    Ping,

    /// Marks the end of a stream request.
    Close,

    /// A request failed, or the stream ended abnormally server-side.
    Error { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::request::{AudioConfig, InteractParams};

    #[test]
    fn request_envelope_carries_uid_mode_and_timestamp() {
        let env = RequestEnvelope::new(
            RequestMode::Request,
            RequestPayload::AddAudio {
                audio: "AAAA".to_string(),
                config: AudioConfig::default(),
            },
        );
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "request");
        assert_eq!(json["kind"], "add_audio");
        assert!(json["uid"].as_str().is_some());
        // RFC 3339 with millisecond precision and a Z suffix.
        let ts = json["client_start_time"].as_str().unwrap();
        assert!(ts.ends_with('Z'), "timestamp not UTC: {ts}");
        assert!(
            chrono::DateTime::parse_from_rfc3339(ts).is_ok(),
            "timestamp not RFC 3339: {ts}"
        );
    }

    #[test]
    fn stream_envelope_uses_stream_type() {
        let env = RequestEnvelope::new(
            RequestMode::Stream,
            RequestPayload::Interact(InteractParams::text("hello")),
        );
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "stream");
        assert_eq!(json["kind"], "interact");
        assert_eq!(json["text"], "hello");
    }

    #[test]
    fn fresh_uids_are_unique() {
        let a = RequestEnvelope::new(RequestMode::Request, RequestPayload::Ping);
        let b = RequestEnvelope::new(RequestMode::Request, RequestPayload::Ping);
        assert_ne!(a.uid, b.uid);
    }

    #[test]
    fn interact_stream_event_deserializes() {
        let json = r#"{
            "uid": "3e2f4d58-7a10-4c2e-9ac1-0f2f8b6a1c55",
            "kind": "interact",
            "event": "text",
            "text": "Good morning."
        }"#;
        let env: ServerEnvelope = serde_json::from_str(json).unwrap();
        assert!(env.uid.is_some());
        assert_eq!(
            env.body,
            ServerBody::Interact {
                event: InteractionEvent::Text {
                    text: "Good morning.".to_string()
                }
            }
        );
    }

    #[test]
    fn check_turn_defaults_to_not_speaking() {
        let json = r#"{"uid":"3e2f4d58-7a10-4c2e-9ac1-0f2f8b6a1c55","kind":"check_turn"}"#;
        let env: ServerEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(
            env.body,
            ServerBody::CheckTurn {
                is_user_still_speaking: false
            }
        );
    }

    #[test]
    fn error_body_carries_message() {
        let json = r#"{"kind":"error","error":"invalid token"}"#;
        let env: ServerEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(
            env.body,
            ServerBody::Error {
                error: "invalid token".to_string()
            }
        );
        assert!(env.uid.is_none());
    }

    #[test]
    fn close_with_server_timestamps() {
        let json = r#"{
            "uid": "3e2f4d58-7a10-4c2e-9ac1-0f2f8b6a1c55",
            "kind": "close",
            "server_start_time": "2025-10-02T09:00:00.000Z",
            "server_end_time": "2025-10-02T09:00:04.512Z"
        }"#;
        let env: ServerEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(env.body, ServerBody::Close);
        assert!(env.server_end_time.is_some());
    }
}
