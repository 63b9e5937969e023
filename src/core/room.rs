//! Room membership and ordered fan-out broadcast

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::RwLock;

use crate::core::message::Envelope;
use crate::core::registry::SharedRegistry;
use crate::error::Result;

/// Bidirectional room membership: room id -> connection ids, and
/// connection id -> room id. A connection belongs to at most one room.
struct Membership {
    rooms: HashMap<String, HashSet<String>>,
    connection_room: HashMap<String, String>,
}

/// Outcome of a broadcast fan-out
#[derive(Debug, Default)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    /// Connections whose delivery failed; the caller schedules their cleanup
    pub failed: Vec<String>,
}

/// Maintains room membership and performs ordered fan-out broadcast.
///
/// Membership mutation takes the write lock on both directions of the
/// mapping at once so the two maps can never diverge. Broadcast takes a
/// snapshot under the read lock and fans out after releasing it; sends go
/// synchronously down each recipient's unbounded channel, which preserves
/// FIFO ordering per sender->room pair (a spawned-task fan-out would not).
pub struct RoomRouter {
    membership: RwLock<Membership>,
    registry: SharedRegistry,
}

impl RoomRouter {
    pub fn new(registry: SharedRegistry) -> Self {
        Self {
            membership: RwLock::new(Membership {
                rooms: HashMap::new(),
                connection_room: HashMap::new(),
            }),
            registry,
        }
    }

    /// Add a connection to a room. Re-joining the same room is a no-op;
    /// joining a different room implicitly leaves the prior one.
    pub async fn join(&self, connection_id: &str, room_id: &str) -> Result<()> {
        {
            let mut membership = self.membership.write().await;

            if let Some(current) = membership.connection_room.get(connection_id).cloned() {
                if current == room_id {
                    return Ok(());
                }
                // Implicit leave of the prior room
                if let Some(members) = membership.rooms.get_mut(&current) {
                    members.remove(connection_id);
                    if members.is_empty() {
                        membership.rooms.remove(&current);
                    }
                }
                debug!(
                    "Connection {} moved from room {} to {}",
                    connection_id, current, room_id
                );
            }

            membership
                .rooms
                .entry(room_id.to_string())
                .or_insert_with(HashSet::new)
                .insert(connection_id.to_string());
            membership
                .connection_room
                .insert(connection_id.to_string(), room_id.to_string());
        }

        // Keep the connection's room-id field consistent with the maps
        self.registry
            .write()
            .await
            .set_room(connection_id, Some(room_id.to_string()));
        Ok(())
    }

    /// Remove a connection from its room. No-op if not currently in one.
    pub async fn leave(&self, connection_id: &str) -> Option<String> {
        let left = {
            let mut membership = self.membership.write().await;
            match membership.connection_room.remove(connection_id) {
                Some(room_id) => {
                    if let Some(members) = membership.rooms.get_mut(&room_id) {
                        members.remove(connection_id);
                        if members.is_empty() {
                            membership.rooms.remove(&room_id);
                        }
                    }
                    Some(room_id)
                }
                None => None,
            }
        };

        if left.is_some() {
            self.registry.write().await.set_room(connection_id, None);
        }
        left
    }

    pub async fn room_of(&self, connection_id: &str) -> Option<String> {
        self.membership
            .read()
            .await
            .connection_room
            .get(connection_id)
            .cloned()
    }

    /// Consistent snapshot of a room's current members
    pub async fn members(&self, room_id: &str) -> Vec<String> {
        self.membership
            .read()
            .await
            .rooms
            .get(room_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn member_count(&self, room_id: &str) -> usize {
        self.membership
            .read()
            .await
            .rooms
            .get(room_id)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub async fn room_count(&self) -> usize {
        self.membership.read().await.rooms.len()
    }

    /// Deliver an envelope to every member of a room except `exclude`.
    ///
    /// The membership snapshot is taken before fan-out, so a join or leave
    /// occurring mid-broadcast never yields a partially-iterated view. Per-
    /// recipient failures are logged and reported for cleanup without
    /// aborting delivery to the rest of the room.
    pub async fn broadcast(
        &self,
        room_id: &str,
        envelope: &Envelope,
        exclude: Option<&str>,
    ) -> BroadcastOutcome {
        let snapshot = self.members(room_id).await;

        let mut outcome = BroadcastOutcome::default();
        let registry = self.registry.read().await;
        for member_id in snapshot {
            if Some(member_id.as_str()) == exclude {
                continue;
            }
            if registry.send_to(&member_id, envelope) {
                outcome.delivered += 1;
            } else {
                warn!(
                    "Broadcast delivery to {} in room {} failed, scheduling cleanup",
                    member_id, room_id
                );
                outcome.failed.push(member_id);
            }
        }
        outcome
    }
}

pub type SharedRoomRouter = Arc<RoomRouter>;
