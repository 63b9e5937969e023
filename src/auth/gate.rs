//! Authentication gate for incoming connections
//!
//! The first accepted message on a connection must carry a session token;
//! the gate verifies it against the external collaborator and populates
//! the connection's identity fields. Verification failures leave the
//! connection open and unauthenticated so the client may retry.

use std::num::NonZeroUsize;
use std::sync::Arc;

use log::{debug, info};
use lru::LruCache;
use tokio::sync::Mutex;

use crate::auth::identity::VerifiedIdentity;
use crate::auth::verifier::TokenVerifier;
use crate::core::registry::SharedRegistry;
use crate::error::{ClassHubError, Result};

const TOKEN_CACHE_SIZE: usize = 1024;

/// Outcome of an authentication attempt
pub enum AuthOutcome {
    /// Identity attached to the connection for the first time
    Authenticated(VerifiedIdentity),
    /// Connection was already authenticated; the attempt is acknowledged
    /// without mutating identity, room membership, or rate state
    AlreadyAuthenticated(VerifiedIdentity),
}

pub struct AuthenticationGate {
    verifier: Arc<dyn TokenVerifier>,
    registry: SharedRegistry,
    /// Recently verified tokens, so a reconnecting client does not hammer
    /// the external verifier. Entries respect token expiry.
    cache: Mutex<LruCache<String, VerifiedIdentity>>,
}

impl AuthenticationGate {
    pub fn new(verifier: Arc<dyn TokenVerifier>, registry: SharedRegistry) -> Self {
        let capacity = NonZeroUsize::new(TOKEN_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            verifier,
            registry,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Verify a token and attach the resulting identity to the connection.
    ///
    /// Fail-closed: verifier unavailability is an authentication failure.
    pub async fn authenticate(&self, connection_id: &str, token: &str) -> Result<AuthOutcome> {
        // Re-authentication of an authenticated connection is a no-op
        if let Some(existing) = self.registry.read().await.identity(connection_id) {
            info!(
                "Connection {} re-authenticated as {}; ignoring",
                connection_id, existing.user_id
            );
            return Ok(AuthOutcome::AlreadyAuthenticated(existing));
        }

        let identity = match self.cached_identity(token).await {
            Some(identity) => {
                debug!("Token cache hit for connection {}", connection_id);
                identity
            }
            None => {
                let identity = self.verifier.verify(token).await.map_err(|e| match e {
                    // Collaborator unreachable: deny rather than admit
                    ClassHubError::DependencyError(msg) => {
                        ClassHubError::AuthError(format!("verifier unavailable: {}", msg))
                    }
                    other => other,
                })?;
                self.cache
                    .lock()
                    .await
                    .put(token.to_string(), identity.clone());
                identity
            }
        };

        if identity.is_expired() {
            return Err(ClassHubError::AuthError("token expired".to_string()));
        }

        self.registry
            .write()
            .await
            .set_identity(connection_id, identity.clone())?;
        info!(
            "Connection {} authenticated as {} ({})",
            connection_id,
            identity.user_id,
            identity.role.as_str()
        );
        Ok(AuthOutcome::Authenticated(identity))
    }

    async fn cached_identity(&self, token: &str) -> Option<VerifiedIdentity> {
        let mut cache = self.cache.lock().await;
        match cache.get(token) {
            Some(identity) if !identity.is_expired() => Some(identity.clone()),
            Some(_) => {
                cache.pop(token);
                None
            }
            None => None,
        }
    }
}

pub type SharedAuthenticationGate = Arc<AuthenticationGate>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::Role;
    use crate::auth::verifier::StaticTokenVerifier;
    use crate::core::registry::create_registry;
    use tokio::sync::mpsc;

    async fn setup() -> (SharedRegistry, AuthenticationGate, Arc<StaticTokenVerifier>) {
        let registry = create_registry();
        let verifier = Arc::new(StaticTokenVerifier::new());
        let gate = AuthenticationGate::new(verifier.clone(), registry.clone());
        (registry, gate, verifier)
    }

    fn identity(user_id: &str) -> VerifiedIdentity {
        VerifiedIdentity::new(
            user_id.to_string(),
            Role::Student,
            Some("parent-1".to_string()),
            chrono::Utc::now().timestamp() + 600,
        )
    }

    #[tokio::test]
    async fn test_successful_authentication_populates_identity() {
        let (registry, gate, verifier) = setup().await;
        verifier.insert("tok", identity("u1")).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = registry.write().await.register(tx);

        match gate.authenticate(&conn_id, "tok").await.unwrap() {
            AuthOutcome::Authenticated(id) => assert_eq!(id.user_id, "u1"),
            _ => panic!("expected first-time authentication"),
        }
        assert!(registry.read().await.get(&conn_id).unwrap().is_authenticated());
    }

    #[tokio::test]
    async fn test_failed_auth_leaves_connection_unauthenticated() {
        let (registry, gate, _verifier) = setup().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = registry.write().await.register(tx);

        assert!(gate.authenticate(&conn_id, "bogus").await.is_err());
        assert!(!registry.read().await.get(&conn_id).unwrap().is_authenticated());
    }

    #[tokio::test]
    async fn test_reauthentication_is_noop() {
        let (registry, gate, verifier) = setup().await;
        verifier.insert("tok-a", identity("u1")).await;
        verifier.insert("tok-b", identity("u2")).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = registry.write().await.register(tx);

        gate.authenticate(&conn_id, "tok-a").await.unwrap();
        // Second auth with a different token must not mutate identity
        match gate.authenticate(&conn_id, "tok-b").await.unwrap() {
            AuthOutcome::AlreadyAuthenticated(id) => assert_eq!(id.user_id, "u1"),
            _ => panic!("expected no-op re-authentication"),
        }
        assert_eq!(
            registry.read().await.identity(&conn_id).unwrap().user_id,
            "u1"
        );
    }
}
