//! Session-token verification collaborator
//!
//! The hub never issues tokens; it only verifies them. [`TokenVerifier`] is
//! the seam to the external authentication service, with a JWT-backed
//! implementation for deployments that share a signing secret with the
//! token issuer, and an in-memory implementation for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::auth::identity::{Role, VerifiedIdentity};
use crate::error::{ClassHubError, Result};

/// External session-token verification contract.
///
/// Implementations may perform network I/O; failures surface as
/// `DependencyError` and are treated fail-closed by the caller.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity>;
}

/// JWT claims as issued by the platform's authentication service
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Role name: student | teacher | parent_observer | moderator
    pub role: String,
    /// Linked parent id for child accounts
    pub parent_id: Option<String>,
    /// Expiration time (as UTC timestamp)
    pub exp: usize,
    /// Issued at (as UTC timestamp)
    pub iat: usize,
}

/// Verifies JWT session tokens against a shared signing secret
pub struct JwtTokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    fn parse_role(role: &str) -> Result<Role> {
        match role {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "parent_observer" | "parent" => Ok(Role::ParentObserver),
            "moderator" => Ok(Role::Moderator),
            other => Err(ClassHubError::AuthError(format!(
                "unknown role in token: {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtTokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity> {
        if token.is_empty() {
            return Err(ClassHubError::AuthError("empty token".to_string()));
        }
        if token.len() > 2048 {
            return Err(ClassHubError::AuthError("token too long".to_string()));
        }
        if token.chars().any(|c| c.is_control()) {
            return Err(ClassHubError::AuthError(
                "token contains invalid characters".to_string(),
            ));
        }

        let data = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| ClassHubError::AuthError(format!("invalid token: {}", e)))?;

        let claims = data.claims;
        if claims.sub.is_empty() {
            return Err(ClassHubError::AuthError("missing subject".to_string()));
        }

        let role = Self::parse_role(&claims.role)?;
        // Child accounts must carry a parent link for escalation
        if role == Role::Student && claims.parent_id.is_none() {
            return Err(ClassHubError::AuthError(
                "student token missing parent link".to_string(),
            ));
        }

        Ok(VerifiedIdentity::new(
            claims.sub,
            role,
            claims.parent_id,
            claims.exp as i64,
        ))
    }
}

/// In-memory verifier mapping opaque tokens to identities.
///
/// Used by tests and by deployments that resolve tokens out of band before
/// handing them to the hub.
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: RwLock<HashMap<String, VerifiedIdentity>>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, token: &str, identity: VerifiedIdentity) {
        self.tokens
            .write()
            .await
            .insert(token.to_string(), identity);
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity> {
        let tokens = self.tokens.read().await;
        match tokens.get(token) {
            Some(identity) if !identity.is_expired() => Ok(identity.clone()),
            Some(_) => Err(ClassHubError::AuthError("token expired".to_string())),
            None => Err(ClassHubError::AuthError("unknown token".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn make_token(secret: &str, claims: &SessionClaims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_jwt_verify_student() {
        let secret = "unit-test-signing-secret";
        let verifier = JwtTokenVerifier::new(secret);
        let now = chrono::Utc::now().timestamp() as usize;

        let token = make_token(
            secret,
            &SessionClaims {
                sub: "child-1".to_string(),
                role: "student".to_string(),
                parent_id: Some("parent-1".to_string()),
                exp: now + 3600,
                iat: now,
            },
        );

        let identity = verifier.verify(&token).await.unwrap();
        assert_eq!(identity.user_id, "child-1");
        assert_eq!(identity.role, Role::Student);
        assert_eq!(identity.parent_id.as_deref(), Some("parent-1"));
    }

    #[tokio::test]
    async fn test_jwt_rejects_student_without_parent_link() {
        let secret = "unit-test-signing-secret";
        let verifier = JwtTokenVerifier::new(secret);
        let now = chrono::Utc::now().timestamp() as usize;

        let token = make_token(
            secret,
            &SessionClaims {
                sub: "child-1".to_string(),
                role: "student".to_string(),
                parent_id: None,
                exp: now + 3600,
                iat: now,
            },
        );

        assert!(verifier.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_jwt_rejects_garbage() {
        let verifier = JwtTokenVerifier::new("unit-test-signing-secret");
        assert!(verifier.verify("not-a-jwt").await.is_err());
        assert!(verifier.verify("").await.is_err());
    }

    #[tokio::test]
    async fn test_static_verifier() {
        let verifier = StaticTokenVerifier::new();
        let identity = VerifiedIdentity::new(
            "t1".to_string(),
            Role::Teacher,
            None,
            chrono::Utc::now().timestamp() + 600,
        );
        verifier.insert("tok-1", identity.clone()).await;

        assert_eq!(verifier.verify("tok-1").await.unwrap(), identity);
        assert!(verifier.verify("tok-2").await.is_err());
    }
}
