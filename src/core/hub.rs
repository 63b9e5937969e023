//! Integrated hub instance owning every subsystem
//!
//! The hub replaces module-level singleton stores with an explicit owner:
//! registries, room maps, rate windows, and session state all hang off one
//! `Hub`, so multiple instances can coexist and be tested in isolation.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::interval;
use warp::ws::Message as WsMessage;

use crate::auth::gate::{AuthenticationGate, SharedAuthenticationGate};
use crate::auth::verifier::TokenVerifier;
use crate::constants::{
    DEFAULT_HEARTBEAT_TIMEOUT_SECS, DEFAULT_RATE_LIMIT_MAX_MESSAGES,
    DEFAULT_RATE_LIMIT_WINDOW_SECS, DEFAULT_SESSION_GRACE_SECS, DEFAULT_STUDENT_CAPACITY,
    DEFAULT_SWEEP_INTERVAL_SECS, DEFAULT_VOICE_CONFIDENCE_MIN,
};
use crate::core::message::Envelope;
use crate::core::rate_limiter::RateLimiter;
use crate::core::registry::{create_registry, SharedRegistry};
use crate::core::room::{RoomRouter, SharedRoomRouter};
use crate::safety::classifier::VoiceSafetyClassifier;
use crate::safety::emergency::{EmergencyController, SharedEmergencyController};
use crate::safety::monitor::SafetyMonitor;
use crate::safety::relay::{NotificationRelay, SharedNotificationRelay};
use crate::services::locale::LocaleLookup;
use crate::services::translation::Translator;
use crate::session::manager::{SessionManager, SharedSessionManager};

/// Tunables for a hub instance
#[derive(Debug, Clone)]
pub struct HubOptions {
    pub rate_limit_max_messages: u32,
    pub rate_limit_window: Duration,
    pub heartbeat_timeout: Duration,
    pub sweep_interval: Duration,
    pub session_grace: Duration,
    pub default_student_capacity: usize,
    pub voice_confidence_min: f32,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            rate_limit_max_messages: DEFAULT_RATE_LIMIT_MAX_MESSAGES,
            rate_limit_window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            heartbeat_timeout: Duration::from_secs(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            session_grace: Duration::from_secs(DEFAULT_SESSION_GRACE_SECS),
            default_student_capacity: DEFAULT_STUDENT_CAPACITY,
            voice_confidence_min: DEFAULT_VOICE_CONFIDENCE_MIN,
        }
    }
}

/// External collaborators injected at construction
pub struct Collaborators {
    pub verifier: Arc<dyn TokenVerifier>,
    pub classifier: Arc<dyn VoiceSafetyClassifier>,
    pub translator: Arc<dyn Translator>,
    pub locale: Arc<dyn LocaleLookup>,
}

/// Point-in-time snapshot for the management layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubStatus {
    pub connections: usize,
    pub rooms: usize,
    pub active_classrooms: usize,
}

/// Owns the connection registry, room router, rate limiter, auth gate,
/// session manager, and safety pipeline of one hub process.
pub struct Hub {
    options: HubOptions,
    registry: SharedRegistry,
    rooms: SharedRoomRouter,
    limiter: Arc<RateLimiter>,
    gate: SharedAuthenticationGate,
    sessions: SharedSessionManager,
    relay: SharedNotificationRelay,
    emergency: SharedEmergencyController,
    monitor: Arc<SafetyMonitor>,
    translator: Arc<dyn Translator>,
}

impl Hub {
    pub fn new(options: HubOptions, collaborators: Collaborators) -> Arc<Self> {
        let registry = create_registry();
        let rooms: SharedRoomRouter = Arc::new(RoomRouter::new(registry.clone()));
        let limiter = Arc::new(RateLimiter::new(
            options.rate_limit_max_messages,
            options.rate_limit_window,
        ));
        let gate = Arc::new(AuthenticationGate::new(
            collaborators.verifier.clone(),
            registry.clone(),
        ));
        let sessions: SharedSessionManager = Arc::new(SessionManager::new(
            registry.clone(),
            rooms.clone(),
            collaborators.verifier,
            collaborators.locale,
            options.default_student_capacity,
        ));
        let relay: SharedNotificationRelay = Arc::new(NotificationRelay::new(registry.clone()));
        let emergency: SharedEmergencyController = Arc::new(EmergencyController::new(
            registry.clone(),
            rooms.clone(),
            sessions.clone(),
            limiter.clone(),
        ));
        let monitor = Arc::new(SafetyMonitor::new(
            collaborators.classifier,
            sessions.clone(),
            emergency.clone(),
            relay.clone(),
            options.voice_confidence_min,
        ));

        Arc::new(Self {
            options,
            registry,
            rooms,
            limiter,
            gate,
            sessions,
            relay,
            emergency,
            monitor,
            translator: collaborators.translator,
        })
    }

    // Subsystem accessors

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &SharedRoomRouter {
        &self.rooms
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn gate(&self) -> &SharedAuthenticationGate {
        &self.gate
    }

    pub fn sessions(&self) -> &SharedSessionManager {
        &self.sessions
    }

    pub fn relay(&self) -> &SharedNotificationRelay {
        &self.relay
    }

    pub fn emergency(&self) -> &SharedEmergencyController {
        &self.emergency
    }

    pub fn monitor(&self) -> &Arc<SafetyMonitor> {
        &self.monitor
    }

    pub fn translator(&self) -> &Arc<dyn Translator> {
        &self.translator
    }

    pub fn options(&self) -> &HubOptions {
        &self.options
    }

    /// Register a new transport connection, returning its connection id
    pub async fn register_connection(&self, sender: mpsc::UnboundedSender<WsMessage>) -> String {
        let mut registry = self.registry.write().await;
        let id = registry.register(sender);
        info!(
            "Client connected: {} ({} connections)",
            id,
            registry.connection_count()
        );
        id
    }

    /// Full teardown of a connection: classroom leave, room removal, rate
    /// window removal, registry removal. Safe to call twice.
    pub async fn unregister_connection(&self, connection_id: &str) {
        let room = self.registry.read().await.room_of(connection_id);
        if let Some(classroom_id) = room {
            if let Err(e) = self
                .sessions
                .leave_classroom(connection_id, &classroom_id)
                .await
            {
                warn!(
                    "Classroom teardown for {} failed: {}; removing from room directly",
                    connection_id, e
                );
                self.rooms.leave(connection_id).await;
            }
        }

        self.limiter.remove_connection(connection_id).await;
        let mut registry = self.registry.write().await;
        if registry.remove(connection_id).is_some() {
            info!(
                "Client disconnected: {} ({} connections)",
                connection_id,
                registry.connection_count()
            );
        }
    }

    /// Deliver an envelope to one connection
    pub async fn send_to_connection(&self, connection_id: &str, envelope: &Envelope) -> bool {
        self.registry.read().await.send_to(connection_id, envelope)
    }

    /// Broadcast into a room and clean up any recipients whose transport
    /// has failed.
    pub async fn broadcast_to_room(
        &self,
        room_id: &str,
        envelope: &Envelope,
        exclude: Option<&str>,
    ) -> usize {
        let outcome = self.rooms.broadcast(room_id, envelope, exclude).await;
        for failed in &outcome.failed {
            self.unregister_connection(failed).await;
        }
        outcome.delivered
    }

    pub async fn status(&self) -> HubStatus {
        HubStatus {
            connections: self.registry.read().await.connection_count(),
            rooms: self.rooms.room_count().await,
            active_classrooms: self.sessions.active_session_count().await,
        }
    }

    /// Start the periodic background sweep: disconnects connections whose
    /// heartbeat has lapsed, prunes stale rate windows, and purges ended
    /// classroom sessions past their grace window.
    pub fn start_background_sweep(self: &Arc<Self>) {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(hub.options.sweep_interval);
            loop {
                ticker.tick().await;
                hub.sweep_once().await;
            }
        });
    }

    async fn sweep_once(&self) {
        let stale = {
            let registry = self.registry.read().await;
            registry.stale_connections(self.options.heartbeat_timeout)
        };
        if !stale.is_empty() {
            info!("Sweeping {} stale connections", stale.len());
            for connection_id in stale {
                self.unregister_connection(&connection_id).await;
            }
        }

        self.limiter.cleanup_old_entries().await;
        self.sessions.purge_expired(self.options.session_grace).await;
    }
}

// Shared reference to a hub instance
pub type SharedHub = Arc<Hub>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::verifier::StaticTokenVerifier;
    use crate::safety::classifier::ScriptedClassifier;
    use crate::services::locale::StaticLocaleLookup;
    use crate::services::translation::IdentityTranslator;

    fn test_hub() -> SharedHub {
        Hub::new(
            HubOptions::default(),
            Collaborators {
                verifier: Arc::new(StaticTokenVerifier::new()),
                classifier: Arc::new(ScriptedClassifier::new()),
                translator: Arc::new(IdentityTranslator),
                locale: Arc::new(StaticLocaleLookup::default()),
            },
        )
    }

    #[tokio::test]
    async fn test_register_unregister_lifecycle() {
        let hub = test_hub();
        let (tx, _rx) = mpsc::unbounded_channel();

        let id = hub.register_connection(tx).await;
        assert_eq!(hub.status().await.connections, 1);

        hub.unregister_connection(&id).await;
        assert_eq!(hub.status().await.connections, 0);

        // Double teardown is harmless
        hub.unregister_connection(&id).await;
    }

    #[tokio::test]
    async fn test_sweep_removes_stale_connections() {
        let mut options = HubOptions::default();
        options.heartbeat_timeout = Duration::from_millis(10);
        let hub = Hub::new(
            options,
            Collaborators {
                verifier: Arc::new(StaticTokenVerifier::new()),
                classifier: Arc::new(ScriptedClassifier::new()),
                translator: Arc::new(IdentityTranslator),
                locale: Arc::new(StaticLocaleLookup::default()),
            },
        );

        let (tx, _rx) = mpsc::unbounded_channel();
        hub.register_connection(tx).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        hub.sweep_once().await;
        assert_eq!(hub.status().await.connections, 0);
    }
}
