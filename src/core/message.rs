//! Wire protocol for hub messages
//!
//! Every message on the wire is an [`Envelope`] carrying one of the closed
//! set of [`MessageType`] variants plus a type-specific JSON payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ClassHubError, Result};

/// Closed set of message types understood by the hub.
///
/// Unknown strings fail deserialization, so dispatch over this enum is
/// exhaustive and compiler-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    AuthRequest,
    AuthSuccess,
    AuthFailed,
    JoinClassroom,
    LeaveClassroom,
    UserJoined,
    UserLeft,
    AvatarUpdate,
    VoiceData,
    GestureData,
    Interaction,
    LessonUpdate,
    ProgressUpdate,
    TranslationRequest,
    TranslationResponse,
    SafetyAlert,
    ParentNotification,
    EmergencyEnd,
    Heartbeat,
    Error,
    Notification,
}

impl MessageType {
    /// Message types that only the server may originate. A client sending
    /// one of these is a protocol violation.
    pub fn is_server_only(&self) -> bool {
        matches!(
            self,
            Self::AuthSuccess
                | Self::AuthFailed
                | Self::UserJoined
                | Self::UserLeft
                | Self::TranslationResponse
                | Self::SafetyAlert
                | Self::ParentNotification
                | Self::Error
                | Self::Notification
        )
    }

    /// Message types fanned out to the sender's current room.
    pub fn is_room_broadcast(&self) -> bool {
        matches!(
            self,
            Self::AvatarUpdate
                | Self::VoiceData
                | Self::GestureData
                | Self::Interaction
                | Self::LessonUpdate
        )
    }
}

/// The wire envelope shared by every message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: Uuid,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classroom_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Build a server-originated envelope.
    pub fn server(kind: MessageType, classroom_id: Option<String>, data: Value) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            kind,
            sender_id: None,
            classroom_id,
            timestamp: Utc::now(),
            data,
        }
    }

    /// Parse an inbound envelope from raw text.
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| ClassHubError::MessageParseError(format!("invalid envelope: {}", e)))
    }

    /// Serialize for the wire. Serialization of our own types does not fail
    /// in practice; a failure is reported as a protocol error.
    pub fn to_wire(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| ClassHubError::ProtocolError(format!("serialize failed: {}", e)))
    }

    /// Decode the payload into a concrete message body.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| ClassHubError::MessageParseError(format!("invalid payload: {}", e)))
    }
}

// --- Client payloads ---------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequestData {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinClassroomData {
    pub classroom_id: String,
    /// Parent authorization token, required for students joining an
    /// age-restricted classroom.
    pub parent_token: Option<String>,
    /// Target child for a parent-observer attaching in shadow mode
    pub child_id: Option<String>,
    pub platform: String,
    pub age_range: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveClassroomData {
    pub classroom_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceDataPayload {
    /// Base64-encoded audio frame
    pub audio: String,
    pub transcript: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GestureDataPayload {
    pub gesture: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionData {
    pub content: String,
    pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequestData {
    pub text: String,
    pub source_language: String,
    pub target_language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdateData {
    pub lesson_id: String,
    pub completion: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyEndData {
    pub child_id: String,
    pub reason: String,
}

// --- Server payloads ---------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSuccessData {
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthFailedData {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPresenceData {
    pub user_id: String,
    pub display_name: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResponseData {
    pub text: String,
    pub translated: String,
    /// True when the translation collaborator was unavailable and the
    /// original text was passed through.
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationData {
    pub event: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyAlertData {
    pub classroom_id: String,
    pub user_id: String,
    pub category: String,
    pub severity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentNotificationData {
    pub child_id: String,
    pub event: String,
    pub detail: String,
}

/// Build an ERROR envelope for a hub error.
pub fn error_envelope(err: &ClassHubError, classroom_id: Option<String>) -> Envelope {
    Envelope::server(
        MessageType::Error,
        classroom_id,
        serde_json::to_value(ErrorData {
            code: err.wire_code().to_string(),
            message: err.to_string(),
        })
        .unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip() {
        let env = Envelope::server(
            MessageType::Notification,
            Some("class-1".to_string()),
            serde_json::json!({"event": "test", "detail": "hello"}),
        );
        let wire = env.to_wire().unwrap();
        assert!(wire.contains("\"NOTIFICATION\""));

        let parsed = Envelope::parse(&wire).unwrap();
        assert_eq!(parsed.kind, MessageType::Notification);
        assert_eq!(parsed.classroom_id.as_deref(), Some("class-1"));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let raw = r#"{"message_id":"6f8b5c32-2f7a-4a3e-9a3e-123456789abc","type":"TELEPORT","timestamp":"2026-01-01T00:00:00Z","data":{}}"#;
        assert!(Envelope::parse(raw).is_err());
    }

    #[test]
    fn test_server_only_types() {
        assert!(MessageType::AuthSuccess.is_server_only());
        assert!(MessageType::SafetyAlert.is_server_only());
        assert!(!MessageType::VoiceData.is_server_only());
        assert!(!MessageType::Heartbeat.is_server_only());
    }

    #[test]
    fn test_payload_decoding() {
        let env = Envelope {
            message_id: Uuid::new_v4(),
            kind: MessageType::AuthRequest,
            sender_id: Some("u1".to_string()),
            classroom_id: None,
            timestamp: Utc::now(),
            data: serde_json::json!({"token": "abc123"}),
        };
        let payload: AuthRequestData = env.payload().unwrap();
        assert_eq!(payload.token, "abc123");
    }
}
