// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3030;
pub const WS_PATH: &str = "ws";

// Rate limiting defaults
pub const DEFAULT_RATE_LIMIT_MAX_MESSAGES: u32 = 60;
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

// Connection lifecycle defaults
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 90;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

// Classroom defaults
pub const DEFAULT_STUDENT_CAPACITY: usize = 30;
pub const DEFAULT_SESSION_GRACE_SECS: u64 = 300;

// Voice safety classification
pub const DEFAULT_VOICE_CONFIDENCE_MIN: f32 = 0.75;

// Inbound message size ceiling (bytes)
pub const MAX_ENVELOPE_SIZE: usize = 16 * 1024;
