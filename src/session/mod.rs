//! Classroom session lifecycle

pub mod classroom;
pub mod manager;

pub use classroom::{
    ClassroomSession, ClassroomSettings, IncidentCategory, SafetyIncident, SessionReport,
    SessionState, Severity, UserSessionRecord,
};
pub use manager::{EndAuthority, JoinSummary, SessionManager, SessionStatus, SharedSessionManager};
