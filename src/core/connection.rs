//! Connection state for a single transport client
//! Handles the lifecycle of client connections

use std::time::{Duration, Instant};

use log::warn;
use tokio::sync::mpsc;
use uuid::Uuid;
use warp::ws::Message;

use crate::auth::identity::VerifiedIdentity;
use crate::core::message::Envelope;

/// Represents the state of a single client connection.
///
/// Identity fields stay empty until the authentication gate accepts a
/// token; a connection with `identity == None` is unauthenticated.
pub struct Connection {
    pub id: String,
    pub sender: mpsc::UnboundedSender<Message>,
    /// Populated by the authentication gate on success
    pub identity: Option<VerifiedIdentity>,
    /// Room this connection currently belongs to, if any
    pub room_id: Option<String>,
    /// Client platform tag (quest, pico, desktop, ...)
    pub platform: Option<String>,
    pub connected_at: Instant,
    pub last_heartbeat: Instant,
    /// Count of safety incidents attributed to this connection
    pub safety_flags: u32,
    /// Set when the connection has been emergency-disconnected
    pub blocked: bool,
}

impl Connection {
    /// Create a new unauthenticated connection with a unique ID
    pub fn new(sender: mpsc::UnboundedSender<Message>) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            identity: None,
            room_id: None,
            platform: None,
            connected_at: now,
            last_heartbeat: now,
            safety_flags: 0,
            blocked: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.user_id.as_str())
    }

    /// Send a wire envelope through this connection
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match envelope.to_wire() {
            Ok(text) => self.send_text(&text),
            Err(e) => {
                warn!("Failed to serialize envelope for {}: {}", self.id, e);
                false
            }
        }
    }

    /// Send a text message through this connection
    pub fn send_text(&self, text: &str) -> bool {
        match self.sender.send(Message::text(text)) {
            Ok(_) => true,
            Err(_) => {
                warn!("Failed to send message to client {}", self.id);
                false
            }
        }
    }

    /// Ask the transport to close. Outbound messages already queued for a
    /// closed peer are dropped by the transport pump.
    pub fn send_close(&self) {
        let _ = self.sender.send(Message::close());
    }

    /// Update the last heartbeat time
    pub fn touch_heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    /// Check if the connection is stale (no heartbeat for a while)
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.last_heartbeat.elapsed() > timeout
    }

    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
