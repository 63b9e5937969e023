//! Routes safety and progress events to parent and moderator connections

use std::sync::Arc;

use log::{debug, info};

use crate::auth::identity::Role;
use crate::core::message::{Envelope, MessageType, ParentNotificationData, SafetyAlertData};
use crate::core::registry::SharedRegistry;

/// Delivers live notifications to currently-connected parents and
/// moderators. Offline recipients are simply dropped; store-and-forward
/// delivery is out of scope of this core.
pub struct NotificationRelay {
    registry: SharedRegistry,
}

impl NotificationRelay {
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    /// Send a PARENT_NOTIFICATION to the parent's live connection.
    /// Returns true if a connected parent received it.
    pub async fn alert_parent(&self, parent_id: &str, data: ParentNotificationData) -> bool {
        let envelope = Envelope::server(
            MessageType::ParentNotification,
            None,
            serde_json::to_value(&data).unwrap_or_default(),
        );

        let registry = self.registry.read().await;
        let delivered = registry.send_to_user(parent_id, &envelope);
        if delivered {
            info!(
                "Parent {} notified: {} for child {}",
                parent_id, data.event, data.child_id
            );
        } else {
            debug!(
                "Parent {} not connected; dropping {} notification",
                parent_id, data.event
            );
        }
        delivered
    }

    /// Send a SAFETY_ALERT to every live moderator connection.
    /// Returns the number of moderators reached.
    pub async fn alert_moderators(&self, data: SafetyAlertData) -> usize {
        let envelope = Envelope::server(
            MessageType::SafetyAlert,
            Some(data.classroom_id.clone()),
            serde_json::to_value(&data).unwrap_or_default(),
        );

        let registry = self.registry.read().await;
        let moderators = registry.connections_with_role(Role::Moderator);
        let mut reached = 0;
        for moderator in moderators {
            if moderator.send_envelope(&envelope) {
                reached += 1;
            }
        }
        info!(
            "Safety alert ({}) in {} relayed to {} moderators",
            data.category, data.classroom_id, reached
        );
        reached
    }
}

pub type SharedNotificationRelay = Arc<NotificationRelay>;
