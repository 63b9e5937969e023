//! Classroom session state: lifecycle state machine, participant records,
//! and the append-only safety incident log

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::auth::identity::Role;
use crate::error::{ClassHubError, Result};

/// Classroom lifecycle states. Transitions are enforced by
/// [`ClassroomSession`]; `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Initializing,
    Active,
    Paused,
    Ending,
    Ended,
}

/// Category of a recorded safety incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentCategory {
    AdultVoiceDetected,
    ClassifierUnavailable,
    InappropriateContent,
    PersonalInfoShared,
    EmergencyStop,
}

impl IncidentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdultVoiceDetected => "adult_voice_detected",
            Self::ClassifierUnavailable => "classifier_unavailable",
            Self::InappropriateContent => "inappropriate_content",
            Self::PersonalInfoShared => "personal_info_shared",
            Self::EmergencyStop => "emergency_stop",
        }
    }
}

/// Severity tier governing escalation: medium notifies, high disconnects
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Immutable record of a safety violation. Never deleted while the owning
/// classroom session exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyIncident {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub classroom_id: String,
    pub category: IncidentCategory,
    pub severity: Severity,
}

impl SafetyIncident {
    pub fn new(
        user_id: &str,
        classroom_id: &str,
        category: IncidentCategory,
        severity: Severity,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            classroom_id: classroom_id.to_string(),
            category,
            severity,
        }
    }
}

/// Per-participant transient state bound to one classroom session
#[derive(Debug, Clone)]
pub struct UserSessionRecord {
    pub user_id: String,
    /// Anonymized, deterministic for user + session, stable for the session
    pub display_name: String,
    pub role: Role,
    pub connection_id: String,
    pub age_range: Option<String>,
    pub language: String,
    pub voice_verified: bool,
    pub last_activity: DateTime<Utc>,
    pub safety_flags: u32,
    /// Shadow mode: receives broadcasts, own messages never broadcast
    pub write_suppressed: bool,
    pub active: bool,
    pub joined_at: DateTime<Utc>,
}

impl UserSessionRecord {
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Classroom settings fixed at creation
#[derive(Debug, Clone)]
pub struct ClassroomSettings {
    /// Maximum student participants; teachers and observers are exempt
    pub max_students: usize,
    /// When set, joining students must present parent authorization
    pub age_restricted: bool,
}

/// Summary produced when a session ends, retained for a grace window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub classroom_id: String,
    pub subject: String,
    pub duration_secs: i64,
    pub participant_count: usize,
    pub incident_count: usize,
    pub ended_at: DateTime<Utc>,
}

/// Derive the anonymized display name for a user within a session. The
/// derivation is a pure function of (user id, session id), so the same
/// participant keeps the same name for the whole session while remaining
/// unlinkable across sessions.
pub fn anonymized_display_name(user_id: &str, session_id: &str) -> String {
    const FIRST: [&str; 8] = [
        "Amber", "Blue", "Coral", "Golden", "Jade", "Scarlet", "Silver", "Violet",
    ];
    const SECOND: [&str; 8] = [
        "Falcon", "Otter", "Panda", "Dolphin", "Fox", "Koala", "Lynx", "Penguin",
    ];

    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(session_id.as_bytes());
    let digest = hasher.finalize();

    format!(
        "{}{}-{:02x}{:02x}",
        FIRST[(digest[0] % 8) as usize],
        SECOND[(digest[1] % 8) as usize],
        digest[2],
        digest[3]
    )
}

/// A live classroom session. Mutated by the session manager only.
pub struct ClassroomSession {
    pub id: String,
    pub teacher_id: String,
    pub subject: String,
    pub state: SessionState,
    pub participants: HashMap<String, UserSessionRecord>,
    /// Append-only incident log
    incidents: Vec<SafetyIncident>,
    pub settings: ClassroomSettings,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Peak distinct participant count, for the session report
    peak_participants: usize,
    pub report: Option<SessionReport>,
}

impl ClassroomSession {
    pub fn new(teacher_id: &str, subject: &str, settings: ClassroomSettings) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            teacher_id: teacher_id.to_string(),
            subject: subject.to_string(),
            state: SessionState::Initializing,
            participants: HashMap::new(),
            incidents: Vec::new(),
            settings,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            peak_participants: 0,
            report: None,
        }
    }

    pub fn student_count(&self) -> usize {
        self.participants
            .values()
            .filter(|p| p.role == Role::Student)
            .count()
    }

    /// Check whether a participant with the given role may join right now.
    /// Capacity applies only to the student role.
    pub fn check_joinable(&self, role: Role) -> Result<()> {
        match self.state {
            SessionState::Ending | SessionState::Ended => {
                return Err(ClassHubError::ClassroomEnded(self.id.clone()))
            }
            _ => {}
        }
        if role == Role::Student && self.student_count() >= self.settings.max_students {
            return Err(ClassHubError::ClassroomFull);
        }
        Ok(())
    }

    /// Add a participant record. First participant flips the session from
    /// INITIALIZING to ACTIVE.
    pub fn add_participant(&mut self, record: UserSessionRecord) -> Result<()> {
        self.check_joinable(record.role)?;
        self.participants.insert(record.user_id.clone(), record);
        self.peak_participants = self.peak_participants.max(self.participants.len());

        if self.state == SessionState::Initializing {
            self.state = SessionState::Active;
            self.started_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn remove_participant(&mut self, user_id: &str) -> Option<UserSessionRecord> {
        self.participants.remove(user_id)
    }

    pub fn participant(&self, user_id: &str) -> Option<&UserSessionRecord> {
        self.participants.get(user_id)
    }

    pub fn participant_mut(&mut self, user_id: &str) -> Option<&mut UserSessionRecord> {
        self.participants.get_mut(user_id)
    }

    pub fn pause(&mut self) -> Result<()> {
        match self.state {
            SessionState::Active => {
                self.state = SessionState::Paused;
                Ok(())
            }
            other => Err(ClassHubError::InvalidTransition(format!(
                "cannot pause from {:?}",
                other
            ))),
        }
    }

    pub fn resume(&mut self) -> Result<()> {
        match self.state {
            SessionState::Paused => {
                self.state = SessionState::Active;
                Ok(())
            }
            other => Err(ClassHubError::InvalidTransition(format!(
                "cannot resume from {:?}",
                other
            ))),
        }
    }

    /// Enter the ENDING state. Idempotent once ending or ended.
    pub fn begin_ending(&mut self) {
        match self.state {
            SessionState::Ending | SessionState::Ended => {}
            _ => self.state = SessionState::Ending,
        }
    }

    /// Complete the end transition and produce the session report
    pub fn finish_ending(&mut self) -> SessionReport {
        let ended_at = Utc::now();
        self.state = SessionState::Ended;
        self.ended_at = Some(ended_at);

        let started = self.started_at.unwrap_or(self.created_at);
        let report = SessionReport {
            classroom_id: self.id.clone(),
            subject: self.subject.clone(),
            duration_secs: (ended_at - started).num_seconds(),
            participant_count: self.peak_participants,
            incident_count: self.incidents.len(),
            ended_at,
        };
        self.report = Some(report.clone());
        report
    }

    /// Append to the incident log. Incidents are immutable once appended.
    pub fn append_incident(&mut self, incident: SafetyIncident) {
        if let Some(record) = self.participants.get_mut(&incident.user_id) {
            record.safety_flags += 1;
        }
        self.incidents.push(incident);
    }

    pub fn incidents(&self) -> &[SafetyIncident] {
        &self.incidents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(max_students: usize) -> ClassroomSettings {
        ClassroomSettings {
            max_students,
            age_restricted: false,
        }
    }

    fn record(user_id: &str, role: Role, session_id: &str) -> UserSessionRecord {
        UserSessionRecord {
            user_id: user_id.to_string(),
            display_name: anonymized_display_name(user_id, session_id),
            role,
            connection_id: format!("conn-{}", user_id),
            age_range: None,
            language: "en".to_string(),
            voice_verified: false,
            last_activity: Utc::now(),
            safety_flags: 0,
            write_suppressed: false,
            active: true,
            joined_at: Utc::now(),
        }
    }

    #[test]
    fn test_first_join_activates() {
        let mut session = ClassroomSession::new("t1", "physics", settings(10));
        assert_eq!(session.state, SessionState::Initializing);

        let session_id = session.id.clone();
        session
            .add_participant(record("s1", Role::Student, &session_id))
            .unwrap();
        assert_eq!(session.state, SessionState::Active);
        assert!(session.started_at.is_some());
    }

    #[test]
    fn test_student_capacity_only_counts_students() {
        let mut session = ClassroomSession::new("t1", "physics", settings(1));

        let session_id = session.id.clone();
        session
            .add_participant(record("s1", Role::Student, &session_id))
            .unwrap();

        // Second student is rejected
        assert!(matches!(
            session.add_participant(record("s2", Role::Student, &session_id)),
            Err(ClassHubError::ClassroomFull)
        ));

        // Teacher and observer are never capacity-limited
        session
            .add_participant(record("t1", Role::Teacher, &session_id))
            .unwrap();
        session
            .add_participant(record("p1", Role::ParentObserver, &session_id))
            .unwrap();
    }

    #[test]
    fn test_pause_resume_cycle() {
        let mut session = ClassroomSession::new("t1", "physics", settings(10));
        let session_id = session.id.clone();
        session
            .add_participant(record("s1", Role::Student, &session_id))
            .unwrap();

        session.pause().unwrap();
        assert_eq!(session.state, SessionState::Paused);
        assert!(session.pause().is_err());

        session.resume().unwrap();
        assert_eq!(session.state, SessionState::Active);
        assert!(session.resume().is_err());
    }

    #[test]
    fn test_join_rejected_after_ending() {
        let mut session = ClassroomSession::new("t1", "physics", settings(10));
        session.begin_ending();
        assert!(matches!(
            session.check_joinable(Role::Student),
            Err(ClassHubError::ClassroomEnded(_))
        ));

        let report = session.finish_ending();
        assert_eq!(session.state, SessionState::Ended);
        assert_eq!(report.participant_count, 0);
        assert!(matches!(
            session.check_joinable(Role::Teacher),
            Err(ClassHubError::ClassroomEnded(_))
        ));
    }

    #[test]
    fn test_incident_log_appends_and_flags() {
        let mut session = ClassroomSession::new("t1", "physics", settings(10));
        let session_id = session.id.clone();
        session
            .add_participant(record("s1", Role::Student, &session_id))
            .unwrap();

        session.append_incident(SafetyIncident::new(
            "s1",
            &session_id,
            IncidentCategory::InappropriateContent,
            Severity::Medium,
        ));

        assert_eq!(session.incidents().len(), 1);
        assert_eq!(session.participant("s1").unwrap().safety_flags, 1);
    }

    #[test]
    fn test_display_name_deterministic_per_session() {
        let a1 = anonymized_display_name("user-1", "session-1");
        let a2 = anonymized_display_name("user-1", "session-1");
        let b = anonymized_display_name("user-1", "session-2");

        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_ne!(a1, "user-1");
    }
}
