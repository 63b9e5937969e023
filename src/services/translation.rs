//! Text translation collaborator
//!
//! Translation is a convenience feature: when the collaborator is
//! unreachable the hub fails open and delivers the original text
//! untranslated, flagged as degraded.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String>;
}

/// Pass-through translator used until a real engine is wired in, and by
/// tests that only care about the request/response plumbing.
pub struct IdentityTranslator;

#[async_trait]
impl Translator for IdentityTranslator {
    async fn translate(&self, text: &str, _source: &str, _target: &str) -> Result<String> {
        Ok(text.to_string())
    }
}
