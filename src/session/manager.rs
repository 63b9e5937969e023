//! Classroom session lifecycle: join/leave/end orchestration, capacity,
//! parent-observer shadow mode, and session reports

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::auth::identity::{Role, VerifiedIdentity};
use crate::auth::verifier::TokenVerifier;
use crate::core::message::{Envelope, MessageType, UserPresenceData};
use crate::core::registry::SharedRegistry;
use crate::core::room::SharedRoomRouter;
use crate::error::{ClassHubError, Result};
use crate::services::locale::{LocaleInfo, LocaleLookup};
use crate::session::classroom::{
    anonymized_display_name, ClassroomSession, ClassroomSettings, SafetyIncident, SessionReport,
    SessionState, UserSessionRecord,
};

/// Who is allowed to end a classroom session
pub enum EndAuthority {
    /// The owning teacher, identified by user id
    Teacher(String),
    /// The emergency controller acting on a safety escalation
    Emergency,
}

/// Status snapshot exposed to the external management layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub classroom_id: String,
    pub subject: String,
    pub teacher_id: String,
    pub state: SessionState,
    pub participant_count: usize,
    pub student_count: usize,
    pub incident_count: usize,
}

/// Result handed back to the dispatcher after a successful join
#[derive(Debug, Clone)]
pub struct JoinSummary {
    pub classroom_id: String,
    pub display_name: String,
    pub state: SessionState,
}

/// Owns the classroom state machine and every participant record.
/// Room membership changes go through the RoomRouter so its maps and the
/// registry stay consistent with session state.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, ClassroomSession>>,
    /// (classroom id, user id) pairs locked out for the rest of the session
    /// after a high-severity disconnect
    blocked: RwLock<HashSet<(String, String)>>,
    registry: SharedRegistry,
    rooms: SharedRoomRouter,
    verifier: Arc<dyn TokenVerifier>,
    locale: Arc<dyn LocaleLookup>,
    default_capacity: usize,
}

impl SessionManager {
    pub fn new(
        registry: SharedRegistry,
        rooms: SharedRoomRouter,
        verifier: Arc<dyn TokenVerifier>,
        locale: Arc<dyn LocaleLookup>,
        default_capacity: usize,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            blocked: RwLock::new(HashSet::new()),
            registry,
            rooms,
            verifier,
            locale,
            default_capacity,
        }
    }

    /// Create a classroom in the INITIALIZING state. Called by the external
    /// management layer on a teacher action.
    pub async fn create_classroom(
        &self,
        teacher_id: &str,
        subject: &str,
        max_students: Option<usize>,
        age_restricted: bool,
    ) -> String {
        let settings = ClassroomSettings {
            max_students: max_students.unwrap_or(self.default_capacity),
            age_restricted,
        };
        let session = ClassroomSession::new(teacher_id, subject, settings);
        let id = session.id.clone();
        self.sessions.write().await.insert(id.clone(), session);
        info!("Classroom {} created by teacher {}", id, teacher_id);
        id
    }

    pub async fn get_session_status(&self, classroom_id: &str) -> Result<SessionStatus> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(classroom_id)
            .ok_or_else(|| ClassHubError::ClassroomNotFound(classroom_id.to_string()))?;
        Ok(SessionStatus {
            classroom_id: session.id.clone(),
            subject: session.subject.clone(),
            teacher_id: session.teacher_id.clone(),
            state: session.state,
            participant_count: session.participants.len(),
            student_count: session.student_count(),
            incident_count: session.incidents().len(),
        })
    }

    pub async fn get_session_report(&self, classroom_id: &str) -> Option<SessionReport> {
        let sessions = self.sessions.read().await;
        sessions.get(classroom_id).and_then(|s| s.report.clone())
    }

    /// Join a participant into a classroom.
    ///
    /// Validates state and capacity, enforces parent authorization for
    /// students in age-restricted classrooms (fail-closed), resolves locale
    /// metadata (fail-open), derives the anonymized display name, creates
    /// the participant record, joins the room, and broadcasts USER_JOINED.
    pub async fn join_classroom(
        &self,
        connection_id: &str,
        identity: &VerifiedIdentity,
        classroom_id: &str,
        parent_token: Option<&str>,
        platform: &str,
        age_range: Option<String>,
    ) -> Result<JoinSummary> {
        // Pre-checks under the read lock; collect what the slow path needs
        let age_restricted = {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(classroom_id)
                .ok_or_else(|| ClassHubError::ClassroomNotFound(classroom_id.to_string()))?;
            session.check_joinable(identity.role)?;
            session.settings.age_restricted
        };

        if self.is_blocked(classroom_id, &identity.user_id).await {
            return Err(ClassHubError::ConnectionBlocked(identity.user_id.clone()));
        }

        // Child authorization goes through the external token collaborator
        // and is fail-closed: any failure denies the join.
        if identity.role == Role::Student && age_restricted {
            self.verify_parent_authorization(identity, parent_token)
                .await?;
        }

        // Locale metadata is a convenience: failure applies defaults
        let locale = match self.locale.locale_for(&identity.user_id).await {
            Ok(locale) => locale,
            Err(e) => {
                warn!(
                    "Locale lookup failed for {}: {}; using defaults",
                    identity.user_id, e
                );
                LocaleInfo::default()
            }
        };

        let display_name = anonymized_display_name(&identity.user_id, classroom_id);
        let record = UserSessionRecord {
            user_id: identity.user_id.clone(),
            display_name: display_name.clone(),
            role: identity.role,
            connection_id: connection_id.to_string(),
            age_range,
            language: locale.language,
            voice_verified: false,
            last_activity: Utc::now(),
            safety_flags: 0,
            write_suppressed: identity.role == Role::ParentObserver,
            active: true,
            joined_at: Utc::now(),
        };

        // Re-validate under the write lock: state or capacity may have
        // changed while we were waiting on collaborators.
        let state = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(classroom_id)
                .ok_or_else(|| ClassHubError::ClassroomNotFound(classroom_id.to_string()))?;
            session.add_participant(record)?;
            session.state
        };

        self.registry
            .write()
            .await
            .set_platform(connection_id, platform.to_string());
        self.rooms.join(connection_id, classroom_id).await?;

        let joined = Envelope::server(
            MessageType::UserJoined,
            Some(classroom_id.to_string()),
            serde_json::to_value(UserPresenceData {
                user_id: identity.user_id.clone(),
                display_name: display_name.clone(),
                role: identity.role.as_str().to_string(),
            })
            .unwrap_or_default(),
        );
        self.rooms
            .broadcast(classroom_id, &joined, Some(connection_id))
            .await;

        info!(
            "{} joined classroom {} as {} ({:?})",
            identity.user_id, classroom_id, display_name, state
        );
        Ok(JoinSummary {
            classroom_id: classroom_id.to_string(),
            display_name,
            state,
        })
    }

    async fn verify_parent_authorization(
        &self,
        identity: &VerifiedIdentity,
        parent_token: Option<&str>,
    ) -> Result<()> {
        let token = parent_token.ok_or_else(|| {
            ClassHubError::AuthError("parent authorization required".to_string())
        })?;
        let linked_parent = identity.parent_id.as_deref().ok_or_else(|| {
            ClassHubError::AuthError("student has no linked parent".to_string())
        })?;

        // Fail-closed: verifier unavailability denies the join
        let parent = self.verifier.verify(token).await.map_err(|e| {
            ClassHubError::AuthError(format!("parent authorization failed: {}", e))
        })?;

        if parent.role != Role::ParentObserver || parent.user_id != linked_parent {
            return Err(ClassHubError::AuthError(
                "parent token does not match linked parent".to_string(),
            ));
        }
        Ok(())
    }

    /// Remove a participant and broadcast USER_LEFT to the remaining room
    pub async fn leave_classroom(&self, connection_id: &str, classroom_id: &str) -> Result<()> {
        let user_id = self
            .registry
            .read()
            .await
            .get(connection_id)
            .and_then(|c| c.user_id().map(str::to_string))
            .ok_or_else(|| ClassHubError::ConnectionNotFound(connection_id.to_string()))?;

        let removed = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(classroom_id)
                .ok_or_else(|| ClassHubError::ClassroomNotFound(classroom_id.to_string()))?;
            session.remove_participant(&user_id)
        };

        self.rooms.leave(connection_id).await;

        if let Some(record) = removed {
            let left = Envelope::server(
                MessageType::UserLeft,
                Some(classroom_id.to_string()),
                serde_json::to_value(UserPresenceData {
                    user_id: record.user_id.clone(),
                    display_name: record.display_name.clone(),
                    role: record.role.as_str().to_string(),
                })
                .unwrap_or_default(),
            );
            self.rooms
                .broadcast(classroom_id, &left, Some(connection_id))
                .await;
            debug!("{} left classroom {}", user_id, classroom_id);
        }
        Ok(())
    }

    /// Pause an active session. Only the owning teacher may pause.
    pub async fn pause_classroom(&self, classroom_id: &str, requestor: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(classroom_id)
            .ok_or_else(|| ClassHubError::ClassroomNotFound(classroom_id.to_string()))?;
        if session.teacher_id != requestor {
            return Err(ClassHubError::PermissionDenied(
                "only the owning teacher may pause".to_string(),
            ));
        }
        session.pause()
    }

    /// Resume a paused session. Only the owning teacher may resume.
    pub async fn resume_classroom(&self, classroom_id: &str, requestor: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(classroom_id)
            .ok_or_else(|| ClassHubError::ClassroomNotFound(classroom_id.to_string()))?;
        if session.teacher_id != requestor {
            return Err(ClassHubError::PermissionDenied(
                "only the owning teacher may resume".to_string(),
            ));
        }
        session.resume()
    }

    /// End a classroom session: notify the room, force every participant's
    /// leave, transition ENDING -> ENDED, and produce the session report.
    pub async fn end_classroom_session(
        &self,
        classroom_id: &str,
        authority: EndAuthority,
    ) -> Result<SessionReport> {
        // Authorize and enter ENDING so no further joins are accepted
        let participant_connections: Vec<String> = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(classroom_id)
                .ok_or_else(|| ClassHubError::ClassroomNotFound(classroom_id.to_string()))?;

            if let EndAuthority::Teacher(user_id) = &authority {
                if &session.teacher_id != user_id {
                    return Err(ClassHubError::PermissionDenied(
                        "only the owning teacher may end the session".to_string(),
                    ));
                }
            }
            session.begin_ending();
            session
                .participants
                .values()
                .map(|p| p.connection_id.clone())
                .collect()
        };

        // Session-ending notice to everyone still in the room
        let notice = Envelope::server(
            MessageType::Notification,
            Some(classroom_id.to_string()),
            serde_json::json!({
                "event": "session_ending",
                "detail": "the classroom session has been ended",
            }),
        );
        self.rooms.broadcast(classroom_id, &notice, None).await;

        for connection_id in &participant_connections {
            self.rooms.leave(connection_id).await;
        }

        let report = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(classroom_id)
                .ok_or_else(|| ClassHubError::ClassroomNotFound(classroom_id.to_string()))?;
            session.participants.clear();
            session.finish_ending()
        };

        info!(
            "Classroom {} ended: {}s, {} participants, {} incidents",
            classroom_id, report.duration_secs, report.participant_count, report.incident_count
        );
        Ok(report)
    }

    /// Attach a parent observer in shadow mode: the observer receives all
    /// broadcasts in the child's room but its own messages are suppressed.
    pub async fn add_parent_observer(
        &self,
        classroom_id: &str,
        parent: &VerifiedIdentity,
        connection_id: &str,
        child_id: &str,
    ) -> Result<JoinSummary> {
        if parent.role != Role::ParentObserver {
            return Err(ClassHubError::PermissionDenied(
                "observer attachment requires the parent_observer role".to_string(),
            ));
        }

        // The observed child must be a live participant linked to this parent
        let child_linked = {
            let registry = self.registry.read().await;
            registry
                .find_by_user(child_id)
                .and_then(|c| c.identity.as_ref())
                .map(|i| i.parent_id.as_deref() == Some(parent.user_id.as_str()))
                .unwrap_or(false)
        };
        if !child_linked {
            return Err(ClassHubError::PermissionDenied(
                "observer is not the linked parent of this child".to_string(),
            ));
        }

        {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(classroom_id)
                .ok_or_else(|| ClassHubError::ClassroomNotFound(classroom_id.to_string()))?;
            if session.participant(child_id).is_none() {
                return Err(ClassHubError::ValidationError(
                    "child is not in this classroom".to_string(),
                ));
            }
        }

        self.join_classroom(connection_id, parent, classroom_id, None, "observer", None)
            .await
    }

    /// Append an incident to the owning classroom's log. Incidents persist
    /// regardless of whether any live notification target exists.
    pub async fn record_incident(&self, incident: SafetyIncident) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&incident.classroom_id)
            .ok_or_else(|| ClassHubError::ClassroomNotFound(incident.classroom_id.clone()))?;
        info!(
            "Safety incident in {}: {} / {} by {}",
            incident.classroom_id,
            incident.category.as_str(),
            incident.severity.as_str(),
            incident.user_id
        );
        session.append_incident(incident);
        Ok(())
    }

    /// Mark a participant inactive (emergency disconnect path)
    pub async fn mark_inactive(&self, classroom_id: &str, user_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(classroom_id) {
            if let Some(record) = session.participant_mut(user_id) {
                record.active = false;
            }
        }
    }

    /// Lock a user out of a classroom for the rest of the session
    pub async fn block_user(&self, classroom_id: &str, user_id: &str) {
        self.blocked
            .write()
            .await
            .insert((classroom_id.to_string(), user_id.to_string()));
    }

    pub async fn is_blocked(&self, classroom_id: &str, user_id: &str) -> bool {
        self.blocked
            .read()
            .await
            .contains(&(classroom_id.to_string(), user_id.to_string()))
    }

    /// Record that a voice sample from this participant passed
    /// classification. Idempotent.
    pub async fn set_voice_verified(&self, classroom_id: &str, user_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(classroom_id) {
            if let Some(record) = session.participant_mut(user_id) {
                record.voice_verified = true;
            }
        }
    }

    pub async fn touch_activity(&self, classroom_id: &str, user_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(classroom_id) {
            if let Some(record) = session.participant_mut(user_id) {
                record.touch();
            }
        }
    }

    pub async fn participant_record(
        &self,
        classroom_id: &str,
        user_id: &str,
    ) -> Option<UserSessionRecord> {
        let sessions = self.sessions.read().await;
        sessions
            .get(classroom_id)
            .and_then(|s| s.participant(user_id).cloned())
    }

    pub async fn active_session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| !matches!(s.state, SessionState::Ended))
            .count()
    }

    /// Discard ENDED sessions older than the grace window, together with
    /// their block-list entries.
    pub async fn purge_expired(&self, grace: Duration) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::seconds(0));
        let purged: Vec<String> = {
            let mut sessions = self.sessions.write().await;
            let expired: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| {
                    s.state == SessionState::Ended
                        && s.ended_at.map(|t| t < cutoff).unwrap_or(false)
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in &expired {
                sessions.remove(id);
            }
            expired
        };

        if !purged.is_empty() {
            let mut blocked = self.blocked.write().await;
            blocked.retain(|(classroom_id, _)| !purged.contains(classroom_id));
            info!("Purged {} expired classroom sessions", purged.len());
        }
    }
}

pub type SharedSessionManager = Arc<SessionManager>;
