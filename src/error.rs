use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum ClassHubError {
    // Connection errors
    ConnectionNotFound(String),
    ConnectionClosed,
    ConnectionBlocked(String),

    // Message errors
    MessageParseError(String),
    MessageTooLarge(usize),
    ProtocolError(String),

    // Room errors
    RoomNotFound(String),

    // Classroom errors
    ClassroomNotFound(String),
    ClassroomFull,
    ClassroomEnded(String),
    InvalidTransition(String),

    // Auth errors
    AuthError(String),
    Unauthorized,
    PermissionDenied(String),

    // Rate limiting
    RateLimited,

    // Validation errors
    ValidationError(String),

    // External collaborator errors
    DependencyError(String),

    // Configuration errors
    ConfigError(String),
}

impl fmt::Display for ClassHubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionNotFound(id) => write!(f, "Connection not found: {}", id),
            Self::ConnectionClosed => write!(f, "Connection closed unexpectedly"),
            Self::ConnectionBlocked(id) => write!(f, "Connection is blocked: {}", id),
            Self::MessageParseError(msg) => write!(f, "Message parse error: {}", msg),
            Self::MessageTooLarge(size) => write!(f, "Message too large: {} bytes", size),
            Self::ProtocolError(msg) => write!(f, "Protocol error: {}", msg),
            Self::RoomNotFound(id) => write!(f, "Room not found: {}", id),
            Self::ClassroomNotFound(id) => write!(f, "Classroom not found: {}", id),
            Self::ClassroomFull => write!(f, "Classroom is at student capacity"),
            Self::ClassroomEnded(id) => write!(f, "Classroom has ended: {}", id),
            Self::InvalidTransition(msg) => write!(f, "Invalid session transition: {}", msg),
            Self::AuthError(msg) => write!(f, "Authentication error: {}", msg),
            Self::Unauthorized => write!(f, "Unauthorized access"),
            Self::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            Self::RateLimited => write!(f, "Message rate limit exceeded"),
            Self::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Self::DependencyError(msg) => write!(f, "External dependency error: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for ClassHubError {}

impl ClassHubError {
    /// Wire error code sent back to clients in ERROR envelopes
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::ConnectionNotFound(_) => "connection_not_found",
            Self::ConnectionClosed => "connection_closed",
            Self::ConnectionBlocked(_) => "connection_blocked",
            Self::MessageParseError(_) => "malformed_message",
            Self::MessageTooLarge(_) => "message_too_large",
            Self::ProtocolError(_) => "protocol_error",
            Self::RoomNotFound(_) => "room_not_found",
            Self::ClassroomNotFound(_) => "classroom_not_found",
            Self::ClassroomFull => "classroom_full",
            Self::ClassroomEnded(_) => "classroom_ended",
            Self::InvalidTransition(_) => "invalid_state",
            Self::AuthError(_) => "auth_failed",
            Self::Unauthorized => "unauthorized",
            Self::PermissionDenied(_) => "permission_denied",
            Self::RateLimited => "rate_limited",
            Self::ValidationError(_) => "invalid_input",
            Self::DependencyError(_) => "dependency_unavailable",
            Self::ConfigError(_) => "config_error",
        }
    }
}

// Generic result type for the hub
pub type Result<T> = std::result::Result<T, ClassHubError>;
