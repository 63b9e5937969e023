//! Hub configuration module
//! Handles dynamic configuration parameters for the session hub

use std::env;
use std::time::Duration;

use crate::constants::{
    DEFAULT_HEARTBEAT_TIMEOUT_SECS, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_RATE_LIMIT_MAX_MESSAGES,
    DEFAULT_RATE_LIMIT_WINDOW_SECS, DEFAULT_SESSION_GRACE_SECS, DEFAULT_STUDENT_CAPACITY,
    DEFAULT_SWEEP_INTERVAL_SECS, DEFAULT_VOICE_CONFIDENCE_MIN,
};
use crate::core::hub::HubOptions;
use crate::error::{ClassHubError, Result};

/// Hub configuration parameters
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub host: String,
    pub port: u16,
    /// Rate limit: messages per window per connection
    pub rate_limit_max_messages: u32,
    pub rate_limit_window: Duration,
    /// Connections silent longer than this are swept
    pub heartbeat_timeout: Duration,
    pub sweep_interval: Duration,
    /// How long ENDED sessions and their reports are retained
    pub session_grace: Duration,
    /// Default maximum students per classroom
    pub default_student_capacity: usize,
    /// Minimum confidence for a child-voice classification to be trusted
    pub voice_confidence_min: f32,
    /// Secret shared with the session-token issuer
    pub jwt_secret: String,
    /// TLS configuration
    pub enable_tls: bool,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        panic!("HubConfig::default() is not allowed for security reasons. Use HubConfig::from_env() instead.");
    }
}

impl HubConfig {
    /// Create a test configuration - only for tests
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            rate_limit_max_messages: DEFAULT_RATE_LIMIT_MAX_MESSAGES,
            rate_limit_window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            heartbeat_timeout: Duration::from_secs(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            session_grace: Duration::from_secs(DEFAULT_SESSION_GRACE_SECS),
            default_student_capacity: DEFAULT_STUDENT_CAPACITY,
            voice_confidence_min: DEFAULT_VOICE_CONFIDENCE_MIN,
            jwt_secret: "unit-test-jwt-secret-never-use-in-production-0123456789".to_string(),
            enable_tls: false,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }

    /// Validate that the JWT secret meets minimum requirements
    fn validate_jwt_secret(secret: &str) -> Result<()> {
        if secret.len() < 32 {
            return Err(ClassHubError::ConfigError(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        let insecure_patterns = ["change-this", "your-secret-key", "default", "password", "12345"];
        for pattern in &insecure_patterns {
            if secret.contains(pattern) {
                return Err(ClassHubError::ConfigError(format!(
                    "JWT secret contains insecure pattern '{}'. Generate one with: openssl rand -base64 32",
                    pattern
                )));
            }
        }
        Ok(())
    }

    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        let host = env::var("CLASSHUB_HOST").unwrap_or(DEFAULT_HOST.to_string());
        let port = env::var("CLASSHUB_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let rate_limit_max_messages = env::var("CLASSHUB_RATE_LIMIT_MAX_MSG")
            .ok()
            .and_then(|r| r.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_MAX_MESSAGES);

        let rate_limit_window_secs = env::var("CLASSHUB_RATE_LIMIT_WINDOW_SECS")
            .ok()
            .and_then(|r| r.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS);

        let heartbeat_timeout_secs = env::var("CLASSHUB_HEARTBEAT_TIMEOUT_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT_SECS);

        let sweep_interval_secs = env::var("CLASSHUB_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);

        let session_grace_secs = env::var("CLASSHUB_SESSION_GRACE_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(DEFAULT_SESSION_GRACE_SECS);

        let default_student_capacity = env::var("CLASSHUB_STUDENT_CAPACITY")
            .ok()
            .and_then(|c| c.parse().ok())
            .unwrap_or(DEFAULT_STUDENT_CAPACITY);

        let voice_confidence_min = env::var("CLASSHUB_VOICE_CONFIDENCE_MIN")
            .ok()
            .and_then(|c| c.parse().ok())
            .unwrap_or(DEFAULT_VOICE_CONFIDENCE_MIN);

        let jwt_secret = env::var("CLASSHUB_JWT_SECRET")
            .or_else(|_| env::var("JWT_SECRET"))
            .map_err(|_| {
                ClassHubError::ConfigError(
                    "JWT_SECRET environment variable is required. \
                     Generate one with: openssl rand -base64 32"
                        .to_string(),
                )
            })?;

        // TLS configuration
        let enable_tls = env::var("CLASSHUB_ENABLE_TLS")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);
        let tls_cert_path = env::var("CLASSHUB_TLS_CERT_PATH").ok();
        let tls_key_path = env::var("CLASSHUB_TLS_KEY_PATH").ok();

        if enable_tls {
            if tls_cert_path.is_none() || tls_key_path.is_none() {
                return Err(ClassHubError::ConfigError(
                    "TLS is enabled but CLASSHUB_TLS_CERT_PATH or CLASSHUB_TLS_KEY_PATH is not set"
                        .to_string(),
                ));
            }
            if let (Some(cert_path), Some(key_path)) = (&tls_cert_path, &tls_key_path) {
                if !std::path::Path::new(cert_path).exists() {
                    return Err(ClassHubError::ConfigError(format!(
                        "TLS certificate file does not exist: {}",
                        cert_path
                    )));
                }
                if !std::path::Path::new(key_path).exists() {
                    return Err(ClassHubError::ConfigError(format!(
                        "TLS private key file does not exist: {}",
                        key_path
                    )));
                }
            }
        }

        Self::validate_jwt_secret(&jwt_secret)?;

        Ok(Self {
            host,
            port,
            rate_limit_max_messages,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            heartbeat_timeout: Duration::from_secs(heartbeat_timeout_secs),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            session_grace: Duration::from_secs(session_grace_secs),
            default_student_capacity,
            voice_confidence_min,
            jwt_secret,
            enable_tls,
            tls_cert_path,
            tls_key_path,
        })
    }

    /// Map the runtime tunables into hub options
    pub fn hub_options(&self) -> HubOptions {
        HubOptions {
            rate_limit_max_messages: self.rate_limit_max_messages,
            rate_limit_window: self.rate_limit_window,
            heartbeat_timeout: self.heartbeat_timeout,
            sweep_interval: self.sweep_interval,
            session_grace: self.session_grace,
            default_student_capacity: self.default_student_capacity,
            voice_confidence_min: self.voice_confidence_min,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "HubConfig::default() is not allowed for security reasons")]
    fn test_default_panics() {
        let _ = HubConfig::default();
    }

    #[test]
    fn test_for_testing_works_in_tests() {
        let config = HubConfig::for_testing();
        assert!(config.jwt_secret.contains("test"));
        assert!(!config.enable_tls);
    }

    #[test]
    fn test_weak_secret_rejected() {
        assert!(HubConfig::validate_jwt_secret("short").is_err());
        assert!(HubConfig::validate_jwt_secret(
            "password-padded-to-thirty-two-chars-minimum"
        )
        .is_err());
        assert!(HubConfig::validate_jwt_secret(
            "zT8!kQ2mN9xV4cB7hJ1wE5rY0uI3oP6a"
        )
        .is_ok());
    }
}
