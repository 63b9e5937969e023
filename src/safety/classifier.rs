//! Voice-safety classification collaborator

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

/// Result of classifying a voice sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceClassification {
    pub is_child_voice: bool,
    pub confidence: f32,
}

/// External voice-safety classifier contract. Called for voice content
/// originating from student connections; failures are treated fail-closed
/// by the safety monitor.
#[async_trait]
pub trait VoiceSafetyClassifier: Send + Sync {
    async fn classify(&self, user_id: &str, audio: &str) -> Result<VoiceClassification>;
}

/// Scripted classifier for tests and local development: returns a
/// configured classification per user, child-voice with full confidence
/// otherwise.
#[derive(Default)]
pub struct ScriptedClassifier {
    results: RwLock<HashMap<String, VoiceClassification>>,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script(&self, user_id: &str, classification: VoiceClassification) {
        self.results
            .write()
            .await
            .insert(user_id.to_string(), classification);
    }
}

#[async_trait]
impl VoiceSafetyClassifier for ScriptedClassifier {
    async fn classify(&self, user_id: &str, _audio: &str) -> Result<VoiceClassification> {
        let results = self.results.read().await;
        Ok(results.get(user_id).copied().unwrap_or(VoiceClassification {
            is_child_voice: true,
            confidence: 1.0,
        }))
    }
}

/// Classifier that always fails, for exercising the fail-closed path
pub struct UnavailableClassifier;

#[async_trait]
impl VoiceSafetyClassifier for UnavailableClassifier {
    async fn classify(&self, _user_id: &str, _audio: &str) -> Result<VoiceClassification> {
        Err(crate::error::ClassHubError::DependencyError(
            "voice classifier unreachable".to_string(),
        ))
    }
}
