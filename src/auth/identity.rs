use serde::{Deserialize, Serialize};

/// Roles a verified user can hold inside the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Teacher,
    ParentObserver,
    Moderator,
}

impl Role {
    /// Returns the permissions associated with this role
    pub fn permissions(&self) -> Vec<Permission> {
        match self {
            Role::Student => vec![Permission::SendRoomMessages, Permission::ObserveRoom],
            Role::Teacher => vec![
                Permission::SendRoomMessages,
                Permission::ObserveRoom,
                Permission::ManageClassroom,
                Permission::EndClassroom,
            ],
            // Shadow mode: observers receive everything but may not send
            // into the room. They may trigger an emergency stop.
            Role::ParentObserver => {
                vec![Permission::ObserveRoom, Permission::TriggerEmergencyStop]
            }
            Role::Moderator => vec![
                Permission::SendRoomMessages,
                Permission::ObserveRoom,
                Permission::ModerateSafety,
            ],
        }
    }

    /// Check if this role has a specific permission
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::ParentObserver => "parent_observer",
            Role::Moderator => "moderator",
        }
    }
}

/// Permissions that can be granted to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    SendRoomMessages,
    ObserveRoom,
    ManageClassroom,
    EndClassroom,
    ModerateSafety,
    TriggerEmergencyStop,
}

/// Identity returned by the external session-token verification collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedIdentity {
    pub user_id: String,
    pub role: Role,
    /// Linked parent id; present for every child account and used for
    /// escalation and emergency-stop authorization.
    pub parent_id: Option<String>,
    pub permissions: Vec<Permission>,
    /// Unix timestamp (seconds) after which this identity is no longer valid
    pub expires_at: i64,
}

impl VerifiedIdentity {
    pub fn new(user_id: String, role: Role, parent_id: Option<String>, expires_at: i64) -> Self {
        let permissions = role.permissions();
        Self {
            user_id,
            role,
            parent_id,
            permissions,
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        chrono::Utc::now().timestamp() >= self.expires_at
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_permissions() {
        assert!(Role::Teacher.has_permission(Permission::EndClassroom));
        assert!(!Role::Student.has_permission(Permission::EndClassroom));
        assert!(Role::ParentObserver.has_permission(Permission::TriggerEmergencyStop));
        assert!(!Role::ParentObserver.has_permission(Permission::SendRoomMessages));
        assert!(Role::Moderator.has_permission(Permission::ModerateSafety));
    }

    #[test]
    fn test_identity_expiry() {
        let live = VerifiedIdentity::new(
            "u1".to_string(),
            Role::Student,
            Some("p1".to_string()),
            chrono::Utc::now().timestamp() + 3600,
        );
        assert!(!live.is_expired());

        let stale = VerifiedIdentity::new(
            "u2".to_string(),
            Role::Student,
            None,
            chrono::Utc::now().timestamp() - 1,
        );
        assert!(stale.is_expired());
    }
}
