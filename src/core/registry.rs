//! Tracks every live connection and its identity, role, and room assignment

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::RwLock;
use warp::ws::Message;

use crate::auth::identity::{Role, VerifiedIdentity};
use crate::core::connection::Connection;
use crate::core::message::Envelope;
use crate::error::{ClassHubError, Result};

/// Owns every live [`Connection`]. Connections are created on transport
/// open and destroyed on transport close or forced disconnect.
pub struct ConnectionRegistry {
    connections: HashMap<String, Connection>,
    /// user id -> connection id, maintained on authentication and removal
    by_user: HashMap<String, String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            by_user: HashMap::new(),
        }
    }

    /// Register a new unauthenticated connection, returning its id
    pub fn register(&mut self, sender: mpsc::UnboundedSender<Message>) -> String {
        let connection = Connection::new(sender);
        let id = connection.id.clone();
        self.connections.insert(id.clone(), connection);
        id
    }

    /// Remove a connection entirely, returning it for final teardown
    pub fn remove(&mut self, connection_id: &str) -> Option<Connection> {
        let removed = self.connections.remove(connection_id);
        if let Some(conn) = &removed {
            if let Some(user_id) = conn.user_id() {
                // Only clear the user mapping if it still points at us; a
                // reconnect may have claimed the user id already.
                if self.by_user.get(user_id).map(String::as_str) == Some(connection_id) {
                    self.by_user.remove(user_id);
                }
            }
        }
        removed
    }

    pub fn get(&self, connection_id: &str) -> Option<&Connection> {
        self.connections.get(connection_id)
    }

    pub fn get_mut(&mut self, connection_id: &str) -> Option<&mut Connection> {
        self.connections.get_mut(connection_id)
    }

    /// Attach a verified identity to a connection. Called by the
    /// authentication gate exactly once per connection; re-authentication
    /// is a no-op handled upstream.
    pub fn set_identity(
        &mut self,
        connection_id: &str,
        identity: VerifiedIdentity,
    ) -> Result<()> {
        let user_id = identity.user_id.clone();
        let conn = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| ClassHubError::ConnectionNotFound(connection_id.to_string()))?;
        conn.identity = Some(identity);
        self.by_user.insert(user_id, connection_id.to_string());
        Ok(())
    }

    pub fn identity(&self, connection_id: &str) -> Option<VerifiedIdentity> {
        self.connections
            .get(connection_id)
            .and_then(|c| c.identity.clone())
    }

    pub fn set_room(&mut self, connection_id: &str, room_id: Option<String>) {
        if let Some(conn) = self.connections.get_mut(connection_id) {
            conn.room_id = room_id;
        }
    }

    pub fn room_of(&self, connection_id: &str) -> Option<String> {
        self.connections
            .get(connection_id)
            .and_then(|c| c.room_id.clone())
    }

    pub fn set_platform(&mut self, connection_id: &str, platform: String) {
        if let Some(conn) = self.connections.get_mut(connection_id) {
            conn.platform = Some(platform);
        }
    }

    pub fn touch_heartbeat(&mut self, connection_id: &str) {
        if let Some(conn) = self.connections.get_mut(connection_id) {
            conn.touch_heartbeat();
        }
    }

    pub fn mark_blocked(&mut self, connection_id: &str) {
        if let Some(conn) = self.connections.get_mut(connection_id) {
            conn.blocked = true;
        }
    }

    pub fn is_blocked(&self, connection_id: &str) -> bool {
        self.connections
            .get(connection_id)
            .map(|c| c.blocked)
            .unwrap_or(false)
    }

    pub fn add_safety_flag(&mut self, connection_id: &str) {
        if let Some(conn) = self.connections.get_mut(connection_id) {
            conn.safety_flags += 1;
        }
    }

    /// Find the live connection for a user id
    pub fn find_by_user(&self, user_id: &str) -> Option<&Connection> {
        self.by_user
            .get(user_id)
            .and_then(|conn_id| self.connections.get(conn_id))
    }

    /// All live connections holding a given role
    pub fn connections_with_role(&self, role: Role) -> Vec<&Connection> {
        self.connections
            .values()
            .filter(|c| c.identity.as_ref().map(|i| i.role) == Some(role))
            .collect()
    }

    /// Deliver an envelope to a specific connection id
    pub fn send_to(&self, connection_id: &str, envelope: &Envelope) -> bool {
        self.connections
            .get(connection_id)
            .map(|c| c.send_envelope(envelope))
            .unwrap_or(false)
    }

    /// Deliver an envelope to a user's live connection, if any
    pub fn send_to_user(&self, user_id: &str, envelope: &Envelope) -> bool {
        self.find_by_user(user_id)
            .map(|c| c.send_envelope(envelope))
            .unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Check for stale connections and return their IDs
    pub fn stale_connections(&self, timeout: Duration) -> Vec<String> {
        self.connections
            .iter()
            .filter(|(_, conn)| conn.is_stale(timeout))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// Thread-safe registry wrapper shared across connection-handling paths
pub type SharedRegistry = Arc<RwLock<ConnectionRegistry>>;

pub fn create_registry() -> SharedRegistry {
    Arc::new(RwLock::new(ConnectionRegistry::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::Role;

    fn register_one(registry: &mut ConnectionRegistry) -> String {
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(tx)
    }

    #[test]
    fn test_register_and_remove() {
        let mut registry = ConnectionRegistry::new();
        let id = register_one(&mut registry);
        assert_eq!(registry.connection_count(), 1);
        assert!(!registry.get(&id).unwrap().is_authenticated());

        let removed = registry.remove(&id).unwrap();
        assert_eq!(removed.id, id);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_identity_and_user_lookup() {
        let mut registry = ConnectionRegistry::new();
        let id = register_one(&mut registry);

        let identity = VerifiedIdentity::new(
            "student-1".to_string(),
            Role::Student,
            Some("parent-1".to_string()),
            chrono::Utc::now().timestamp() + 600,
        );
        registry.set_identity(&id, identity).unwrap();

        let found = registry.find_by_user("student-1").unwrap();
        assert_eq!(found.id, id);
        assert_eq!(registry.connections_with_role(Role::Student).len(), 1);

        registry.remove(&id);
        assert!(registry.find_by_user("student-1").is_none());
    }

    #[test]
    fn test_room_assignment_tracking() {
        let mut registry = ConnectionRegistry::new();
        let id = register_one(&mut registry);

        registry.set_room(&id, Some("room-1".to_string()));
        assert_eq!(registry.room_of(&id).as_deref(), Some("room-1"));

        registry.set_room(&id, None);
        assert!(registry.room_of(&id).is_none());
    }
}
