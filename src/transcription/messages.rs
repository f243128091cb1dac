//! Wire messages exchanged with the transcription gateway (§4.4, §6).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{Platform, Task};

/// Initial configuration handshake sent immediately after the WebSocket
/// opens.
#[derive(Clone, Debug, Serialize)]
pub struct ConfigMessage {
    pub uid: Uuid,
    pub language: Option<String>,
    pub task: Task,
    pub platform: Platform,
    pub token: String,
    pub meeting_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_url: Option<String>,
    pub model: String,
    pub use_vad: bool,
}

/// Per-frame diagnostic metadata sent before each binary audio frame.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct AudioChunkMetadata {
    pub length: usize,
    pub sample_rate: u32,
}

/// `speaker_activity` outbound envelope (§4.4).
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename = "speaker_activity")]
pub struct SpeakerActivityMessage {
    pub payload: SpeakerActivityPayload,
}

#[derive(Clone, Debug, Serialize)]
pub struct SpeakerActivityPayload {
    pub event_type: &'static str,
    pub participant_name: String,
    pub participant_id_meet: String,
    pub relative_client_timestamp_ms: i64,
    pub uid: Uuid,
    pub token: String,
    pub platform: Platform,
    pub meeting_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_url: Option<String>,
}

/// `session_control` outbound envelope, sent just before a voluntary
/// disconnect (§4.4).
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename = "session_control")]
pub struct SessionControlMessage {
    pub payload: SessionControlPayload,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionControlPayload {
    pub event: &'static str,
    pub uid: Uuid,
    pub client_timestamp_ms: i64,
    pub token: String,
    pub platform: Platform,
    pub meeting_id: String,
}

/// Inbound control/status/transcript messages from the gateway (§4.4).
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum InboundMessage {
    Status {
        status: InboundStatus,
        #[serde(default)]
        message: Option<String>,
    },
    Language {
        language: String,
    },
    Disconnect {
        message: DisconnectMarker,
    },
    Segments {
        segments: Vec<Segment>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundStatus {
    ServerReady,
    Wait,
    Error,
}

/// Marker type matching only the literal string `"DISCONNECT"`.
#[derive(Clone, Debug)]
pub struct DisconnectMarker;

impl<'de> Deserialize<'de> for DisconnectMarker {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == "DISCONNECT" {
            Ok(Self)
        } else {
            Err(serde::de::Error::custom("not a DISCONNECT marker"))
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Segment {
    pub text: String,
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_message_serializes_without_optional_fields() {
        let msg = ConfigMessage {
            uid: Uuid::nil(),
            language: None,
            task: Task::Transcribe,
            platform: Platform::Meet,
            token: "tok".into(),
            meeting_id: "m1".into(),
            meeting_url: None,
            model: "default".into(),
            use_vad: true,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("meeting_url"));
    }

    #[test]
    fn server_ready_deserializes() {
        let raw = r#"{"status":"SERVER_READY"}"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            msg,
            InboundMessage::Status {
                status: InboundStatus::ServerReady,
                ..
            }
        ));
    }

    #[test]
    fn disconnect_deserializes() {
        let raw = r#"{"message":"DISCONNECT"}"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(msg, InboundMessage::Disconnect { .. }));
    }

    #[test]
    fn segments_deserialize() {
        let raw = r#"{"segments":[{"text":"hi","completed":true}]}"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        match msg {
            InboundMessage::Segments { segments } => {
                assert_eq!(segments.len(), 1);
                assert_eq!(segments[0].text, "hi");
            }
            _ => panic!("wrong variant"),
        }
    }
}
