//! Inbound message dispatch with explicit authentication and role guards
//!
//! Every inbound envelope passes the same pipeline: size check, parse,
//! heartbeat/auth short-circuit, authentication guard, rate limit, role
//! guard, then the per-type handler. The guard lives here, in one place,
//! rather than scattered across handlers.

use log::{debug, info, warn};

use crate::auth::gate::AuthOutcome;
use crate::auth::identity::{Permission, Role, VerifiedIdentity};
use crate::constants::MAX_ENVELOPE_SIZE;
use crate::core::hub::SharedHub;
use crate::core::message::{
    error_envelope, AuthFailedData, AuthRequestData, AuthSuccessData, EmergencyEndData, Envelope,
    GestureDataPayload, InteractionData, JoinClassroomData, LeaveClassroomData, MessageType,
    ParentNotificationData, ProgressUpdateData, TranslationRequestData, TranslationResponseData,
    VoiceDataPayload,
};
use crate::error::{ClassHubError, Result};
use crate::safety::monitor::InspectionContext;

/// Routes inbound client messages through the guard pipeline to the
/// owning subsystem.
pub struct Dispatcher {
    hub: SharedHub,
}

impl Dispatcher {
    pub fn new(hub: SharedHub) -> Self {
        Self { hub }
    }

    /// Process one raw inbound message from a connection. Errors are
    /// reported to the client on the wire; the returned result is for
    /// logging only.
    pub async fn handle_message(&self, connection_id: &str, raw: &str) -> Result<()> {
        if raw.len() > MAX_ENVELOPE_SIZE {
            let err = ClassHubError::MessageTooLarge(raw.len());
            self.reply_error(connection_id, &err).await;
            return Err(err);
        }

        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.reply_error(connection_id, &e).await;
                return Err(e);
            }
        };

        match envelope.kind {
            // Heartbeats are accepted from any connection, authenticated
            // or not, and only refresh liveness.
            MessageType::Heartbeat => {
                self.hub
                    .registry()
                    .write()
                    .await
                    .touch_heartbeat(connection_id);
                Ok(())
            }

            MessageType::AuthRequest => self.handle_auth(connection_id, &envelope).await,

            kind => {
                // Authentication guard: any other message on an
                // unauthenticated connection is a protocol error.
                let identity = match self.hub.registry().read().await.identity(connection_id) {
                    Some(identity) => identity,
                    None => {
                        let err = ClassHubError::ProtocolError(
                            "authentication required before any other message".to_string(),
                        );
                        self.reply_error(connection_id, &err).await;
                        return Err(err);
                    }
                };

                if self.hub.registry().read().await.is_blocked(connection_id) {
                    let err = ClassHubError::ConnectionBlocked(connection_id.to_string());
                    self.reply_error(connection_id, &err).await;
                    return Err(err);
                }

                // Per-connection sliding-window budget; the message is
                // dropped but the connection stays up.
                if !self.hub.limiter().allow_message(connection_id).await {
                    debug!("Rate limit exceeded for connection {}", connection_id);
                    let err = ClassHubError::RateLimited;
                    self.reply_error(connection_id, &err).await;
                    return Err(err);
                }

                self.dispatch_authenticated(connection_id, &identity, kind, envelope)
                    .await
            }
        }
    }

    async fn handle_auth(&self, connection_id: &str, envelope: &Envelope) -> Result<()> {
        let payload: AuthRequestData = match envelope.payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.reply_error(connection_id, &e).await;
                return Err(e);
            }
        };

        match self.hub.gate().authenticate(connection_id, &payload.token).await {
            Ok(AuthOutcome::Authenticated(identity))
            | Ok(AuthOutcome::AlreadyAuthenticated(identity)) => {
                let reply = Envelope::server(
                    MessageType::AuthSuccess,
                    None,
                    serde_json::to_value(AuthSuccessData {
                        user_id: identity.user_id.clone(),
                        role: identity.role.as_str().to_string(),
                    })
                    .unwrap_or_default(),
                );
                self.hub.send_to_connection(connection_id, &reply).await;
                Ok(())
            }
            Err(e) => {
                info!("Authentication failed for {}: {}", connection_id, e);
                let reply = Envelope::server(
                    MessageType::AuthFailed,
                    None,
                    serde_json::to_value(AuthFailedData {
                        reason: e.to_string(),
                    })
                    .unwrap_or_default(),
                );
                self.hub.send_to_connection(connection_id, &reply).await;
                // The connection stays open and unauthenticated; it may retry
                Ok(())
            }
        }
    }

    /// Handlers for messages past the authentication guard. The match is
    /// exhaustive over the closed message-type set.
    async fn dispatch_authenticated(
        &self,
        connection_id: &str,
        identity: &VerifiedIdentity,
        kind: MessageType,
        envelope: Envelope,
    ) -> Result<()> {
        match kind {
            MessageType::JoinClassroom => {
                self.handle_join(connection_id, identity, &envelope).await
            }
            MessageType::LeaveClassroom => {
                self.handle_leave(connection_id, &envelope).await
            }

            MessageType::AvatarUpdate
            | MessageType::VoiceData
            | MessageType::GestureData
            | MessageType::Interaction
            | MessageType::LessonUpdate => {
                self.handle_room_content(connection_id, identity, kind, envelope)
                    .await
            }

            MessageType::ProgressUpdate => {
                self.handle_progress(connection_id, identity, &envelope).await
            }

            MessageType::TranslationRequest => {
                self.handle_translation(connection_id, &envelope).await
            }

            MessageType::EmergencyEnd => {
                self.handle_emergency_end(connection_id, identity, &envelope)
                    .await
            }

            // Covered before dispatch
            MessageType::AuthRequest | MessageType::Heartbeat => Ok(()),

            // Server-originated types are never accepted from clients
            MessageType::AuthSuccess
            | MessageType::AuthFailed
            | MessageType::UserJoined
            | MessageType::UserLeft
            | MessageType::TranslationResponse
            | MessageType::SafetyAlert
            | MessageType::ParentNotification
            | MessageType::Error
            | MessageType::Notification => {
                let err = ClassHubError::ProtocolError(format!(
                    "message type {:?} is server-originated",
                    kind
                ));
                self.reply_error(connection_id, &err).await;
                Err(err)
            }
        }
    }

    async fn handle_join(
        &self,
        connection_id: &str,
        identity: &VerifiedIdentity,
        envelope: &Envelope,
    ) -> Result<()> {
        let payload: JoinClassroomData = match envelope.payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.reply_error(connection_id, &e).await;
                return Err(e);
            }
        };

        let result = if identity.role == Role::ParentObserver {
            // Observers attach in shadow mode against their linked child
            let child_id = match payload.child_id.clone() {
                Some(child_id) => child_id,
                None => {
                    let err = ClassHubError::ValidationError(
                        "observer join requires a target child".to_string(),
                    );
                    self.reply_error(connection_id, &err).await;
                    return Err(err);
                }
            };
            self.hub
                .sessions()
                .add_parent_observer(&payload.classroom_id, identity, connection_id, &child_id)
                .await
        } else {
            self.hub
                .sessions()
                .join_classroom(
                    connection_id,
                    identity,
                    &payload.classroom_id,
                    payload.parent_token.as_deref(),
                    &payload.platform,
                    payload.age_range.clone(),
                )
                .await
        };

        match result {
            Ok(summary) => {
                let reply = Envelope::server(
                    MessageType::Notification,
                    Some(summary.classroom_id.clone()),
                    serde_json::json!({
                        "event": "join_accepted",
                        "detail": summary.display_name,
                    }),
                );
                self.hub.send_to_connection(connection_id, &reply).await;
                Ok(())
            }
            Err(e) => {
                self.reply_error(connection_id, &e).await;
                Err(e)
            }
        }
    }

    async fn handle_leave(&self, connection_id: &str, envelope: &Envelope) -> Result<()> {
        let payload: LeaveClassroomData = match envelope.payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.reply_error(connection_id, &e).await;
                return Err(e);
            }
        };

        match self
            .hub
            .sessions()
            .leave_classroom(connection_id, &payload.classroom_id)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                self.reply_error(connection_id, &e).await;
                Err(e)
            }
        }
    }

    /// Room-content messages: broadcast to the sender's room, then hand
    /// the content to the safety monitor.
    async fn handle_room_content(
        &self,
        connection_id: &str,
        identity: &VerifiedIdentity,
        kind: MessageType,
        envelope: Envelope,
    ) -> Result<()> {
        let room = match self.hub.registry().read().await.room_of(connection_id) {
            Some(room) => room,
            None => {
                let err =
                    ClassHubError::ValidationError("not currently in a classroom".to_string());
                self.reply_error(connection_id, &err).await;
                return Err(err);
            }
        };

        // Lesson updates are a teaching surface, not open chat
        if kind == MessageType::LessonUpdate
            && !identity.has_permission(Permission::ManageClassroom)
        {
            let err =
                ClassHubError::PermissionDenied("lesson updates require a teacher".to_string());
            self.reply_error(connection_id, &err).await;
            return Err(err);
        }

        if identity.has_permission(Permission::SendRoomMessages) {
            // Forward the client envelope with a trusted sender id
            let mut outbound = envelope.clone();
            outbound.sender_id = Some(identity.user_id.clone());
            outbound.classroom_id = Some(room.clone());
            self.hub
                .broadcast_to_room(&room, &outbound, Some(connection_id))
                .await;
        } else {
            // Shadow mode: an observer's outbound content is suppressed,
            // not an error.
            debug!(
                "Suppressing {:?} from write-suppressed connection {}",
                kind, connection_id
            );
            return Ok(());
        }

        self.hub
            .sessions()
            .touch_activity(&room, &identity.user_id)
            .await;

        // Content inspection happens after routing
        let ctx = InspectionContext {
            connection_id: connection_id.to_string(),
            user_id: identity.user_id.clone(),
            role: identity.role,
            parent_id: identity.parent_id.clone(),
            classroom_id: room,
        };
        match kind {
            MessageType::VoiceData => {
                if let Ok(payload) = envelope.payload::<VoiceDataPayload>() {
                    self.hub.monitor().inspect_voice(&ctx, &payload).await;
                }
            }
            MessageType::GestureData => {
                if let Ok(payload) = envelope.payload::<GestureDataPayload>() {
                    self.hub.monitor().inspect_gesture(&ctx, &payload.gesture).await;
                }
            }
            MessageType::Interaction => {
                if let Ok(payload) = envelope.payload::<InteractionData>() {
                    self.hub.monitor().inspect_text(&ctx, &payload.content).await;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Progress updates are relayed to the linked parent when connected
    async fn handle_progress(
        &self,
        connection_id: &str,
        identity: &VerifiedIdentity,
        envelope: &Envelope,
    ) -> Result<()> {
        let payload: ProgressUpdateData = match envelope.payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.reply_error(connection_id, &e).await;
                return Err(e);
            }
        };

        if let Some(parent_id) = &identity.parent_id {
            self.hub
                .relay()
                .alert_parent(
                    parent_id,
                    ParentNotificationData {
                        child_id: identity.user_id.clone(),
                        event: "progress_update".to_string(),
                        detail: format!(
                            "{}: {:.0}% complete",
                            payload.lesson_id,
                            payload.completion * 100.0
                        ),
                    },
                )
                .await;
        }
        Ok(())
    }

    /// Translation is fail-open: collaborator failure passes the original
    /// text through flagged as degraded.
    async fn handle_translation(&self, connection_id: &str, envelope: &Envelope) -> Result<()> {
        let payload: TranslationRequestData = match envelope.payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.reply_error(connection_id, &e).await;
                return Err(e);
            }
        };

        let (translated, degraded) = match self
            .hub
            .translator()
            .translate(
                &payload.text,
                &payload.source_language,
                &payload.target_language,
            )
            .await
        {
            Ok(translated) => (translated, false),
            Err(e) => {
                warn!("Translation failed, delivering untranslated: {}", e);
                (payload.text.clone(), true)
            }
        };

        let reply = Envelope::server(
            MessageType::TranslationResponse,
            envelope.classroom_id.clone(),
            serde_json::to_value(TranslationResponseData {
                text: payload.text,
                translated,
                degraded,
            })
            .unwrap_or_default(),
        );
        self.hub.send_to_connection(connection_id, &reply).await;
        Ok(())
    }

    async fn handle_emergency_end(
        &self,
        connection_id: &str,
        _identity: &VerifiedIdentity,
        envelope: &Envelope,
    ) -> Result<()> {
        let payload: EmergencyEndData = match envelope.payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.reply_error(connection_id, &e).await;
                return Err(e);
            }
        };

        match self
            .hub
            .emergency()
            .emergency_stop(connection_id, &payload.child_id, &payload.reason)
            .await
        {
            Ok(()) => {
                let reply = Envelope::server(
                    MessageType::Notification,
                    None,
                    serde_json::json!({
                        "event": "emergency_stop_complete",
                        "detail": payload.child_id,
                    }),
                );
                self.hub.send_to_connection(connection_id, &reply).await;
                Ok(())
            }
            Err(e) => {
                self.reply_error(connection_id, &e).await;
                Err(e)
            }
        }
    }

    async fn reply_error(&self, connection_id: &str, err: &ClassHubError) {
        let envelope = error_envelope(err, None);
        self.hub.send_to_connection(connection_id, &envelope).await;
    }
}
