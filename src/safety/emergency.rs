//! Forced-disconnect execution for safety escalations and parent-initiated
//! emergency stops

use std::sync::Arc;

use log::{info, warn};

use crate::auth::identity::{Permission, Role};
use crate::core::message::{Envelope, MessageType};
use crate::core::rate_limiter::RateLimiter;
use crate::core::registry::SharedRegistry;
use crate::core::room::SharedRoomRouter;
use crate::error::{ClassHubError, Result};
use crate::session::classroom::{IncidentCategory, SafetyIncident, Severity};
use crate::session::manager::SharedSessionManager;

/// Executes the irreversible disconnect protocol: the target's record is
/// marked inactive, the user is locked out of the classroom for the rest
/// of the session, the connection is closed and destroyed.
pub struct EmergencyController {
    registry: SharedRegistry,
    rooms: SharedRoomRouter,
    sessions: SharedSessionManager,
    limiter: Arc<RateLimiter>,
}

impl EmergencyController {
    pub fn new(
        registry: SharedRegistry,
        rooms: SharedRoomRouter,
        sessions: SharedSessionManager,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            registry,
            rooms,
            sessions,
            limiter,
        }
    }

    /// Parent-initiated emergency stop of a child connection.
    ///
    /// Accepted only from a parent-role connection whose verified parent id
    /// matches the target child. Idempotent: stopping an already-
    /// disconnected child returns success without side effects.
    pub async fn emergency_stop(
        &self,
        requestor_connection_id: &str,
        child_id: &str,
        reason: &str,
    ) -> Result<()> {
        let requestor = self
            .registry
            .read()
            .await
            .identity(requestor_connection_id)
            .ok_or(ClassHubError::Unauthorized)?;

        if requestor.role != Role::ParentObserver
            || !requestor.has_permission(Permission::TriggerEmergencyStop)
        {
            return Err(ClassHubError::PermissionDenied(
                "emergency stop requires the parent role".to_string(),
            ));
        }

        // Resolve the child's live connection and verify the parent link
        let target = {
            let registry = self.registry.read().await;
            registry.find_by_user(child_id).map(|conn| {
                (
                    conn.id.clone(),
                    conn.identity
                        .as_ref()
                        .and_then(|i| i.parent_id.clone()),
                )
            })
        };

        let (child_connection_id, child_parent) = match target {
            Some(t) => t,
            None => {
                // Already disconnected: success, no side effects
                info!(
                    "Emergency stop for {} ignored: child not connected",
                    child_id
                );
                return Ok(());
            }
        };

        if child_parent.as_deref() != Some(requestor.user_id.as_str()) {
            return Err(ClassHubError::PermissionDenied(
                "requestor is not the linked parent of this child".to_string(),
            ));
        }

        let classroom_id = self.registry.read().await.room_of(&child_connection_id);
        if let Some(classroom_id) = &classroom_id {
            let incident = SafetyIncident::new(
                child_id,
                classroom_id,
                IncidentCategory::EmergencyStop,
                Severity::High,
            );
            if let Err(e) = self.sessions.record_incident(incident).await {
                warn!("Failed to record emergency-stop incident: {}", e);
            }
        }

        info!(
            "Emergency stop: parent {} disconnecting child {} ({})",
            requestor.user_id, child_id, reason
        );
        self.force_disconnect(&child_connection_id, reason).await;
        Ok(())
    }

    /// Forcibly disconnect a connection: notify it with the reason, mark
    /// its session record inactive, block the user for the remainder of
    /// the classroom session, remove it from its room, and destroy it.
    pub async fn force_disconnect(&self, connection_id: &str, reason: &str) {
        let (user_id, classroom_id) = {
            let registry = self.registry.read().await;
            match registry.get(connection_id) {
                Some(conn) => (
                    conn.user_id().map(str::to_string),
                    conn.room_id.clone(),
                ),
                None => return, // already gone
            }
        };

        if let (Some(user_id), Some(classroom_id)) = (&user_id, &classroom_id) {
            self.sessions.mark_inactive(classroom_id, user_id).await;
            self.sessions.block_user(classroom_id, user_id).await;
        }

        self.rooms.leave(connection_id).await;

        {
            let mut registry = self.registry.write().await;
            registry.mark_blocked(connection_id);
            if let Some(conn) = registry.get(connection_id) {
                let notice = Envelope::server(
                    MessageType::Notification,
                    classroom_id.clone(),
                    serde_json::json!({
                        "event": "forced_disconnect",
                        "detail": reason,
                    }),
                );
                conn.send_envelope(&notice);
                conn.send_close();
            }
            registry.remove(connection_id);
        }
        self.limiter.remove_connection(connection_id).await;

        info!(
            "Forced disconnect of {} (user {:?}): {}",
            connection_id, user_id, reason
        );
    }
}

pub type SharedEmergencyController = Arc<EmergencyController>;
