//! Content inspection for child-safety violations
//!
//! Subscribes to voice, gesture, and free-form interaction content after
//! routing, classifies violations, and applies the fixed escalation
//! policy: high severity disconnects, medium severity notifies.

use std::sync::Arc;

use log::{debug, warn};

use crate::auth::identity::Role;
use crate::core::message::{ParentNotificationData, SafetyAlertData, VoiceDataPayload};
use crate::safety::classifier::VoiceSafetyClassifier;
use crate::safety::emergency::SharedEmergencyController;
use crate::safety::relay::SharedNotificationRelay;
use crate::session::classroom::{IncidentCategory, SafetyIncident, Severity};
use crate::session::manager::SharedSessionManager;

/// Who produced the content under inspection
#[derive(Debug, Clone)]
pub struct InspectionContext {
    pub connection_id: String,
    pub user_id: String,
    pub role: Role,
    pub parent_id: Option<String>,
    pub classroom_id: String,
}

/// Gestures that are never acceptable in a classroom
const BLOCKED_GESTURES: [&str; 3] = ["middle_finger", "rude_gesture", "throat_slash"];

/// Phrases screened out of student-visible text content
const BLOCKED_PHRASES: [&str; 5] = ["shut up", "idiot", "stupid", "hate you", "loser"];

pub struct SafetyMonitor {
    classifier: Arc<dyn VoiceSafetyClassifier>,
    sessions: SharedSessionManager,
    emergency: SharedEmergencyController,
    relay: SharedNotificationRelay,
    /// Minimum confidence below which a child-voice result is distrusted
    confidence_min: f32,
}

impl SafetyMonitor {
    pub fn new(
        classifier: Arc<dyn VoiceSafetyClassifier>,
        sessions: SharedSessionManager,
        emergency: SharedEmergencyController,
        relay: SharedNotificationRelay,
        confidence_min: f32,
    ) -> Self {
        Self {
            classifier,
            sessions,
            emergency,
            relay,
            confidence_min,
        }
    }

    /// Inspect voice content. Only student-originated voice goes through
    /// the external classifier; a negative or low-confidence result is a
    /// high-severity violation, and classifier failure is fail-closed.
    pub async fn inspect_voice(&self, ctx: &InspectionContext, payload: &VoiceDataPayload) {
        if ctx.role != Role::Student {
            return;
        }

        match self.classifier.classify(&ctx.user_id, &payload.audio).await {
            Ok(result) => {
                if !result.is_child_voice || result.confidence < self.confidence_min {
                    warn!(
                        "Adult voice detected on student connection {} (confidence {:.2})",
                        ctx.connection_id, result.confidence
                    );
                    self.escalate(ctx, IncidentCategory::AdultVoiceDetected, Severity::High)
                        .await;
                } else {
                    self.mark_voice_verified(ctx).await;
                }
            }
            Err(e) => {
                // Fail-closed: uncertainty about who is speaking to
                // children forces the disconnect.
                warn!(
                    "Voice classifier unavailable for {}: {}; failing closed",
                    ctx.connection_id, e
                );
                self.escalate(ctx, IncidentCategory::ClassifierUnavailable, Severity::High)
                    .await;
            }
        }

        // Transcripts, when present, get the same text screening as
        // free-form interactions.
        if let Some(transcript) = &payload.transcript {
            self.inspect_text(ctx, transcript).await;
        }
    }

    /// Inspect free-form interaction text
    pub async fn inspect_text(&self, ctx: &InspectionContext, content: &str) {
        let lowered = content.to_lowercase();

        if BLOCKED_PHRASES.iter().any(|p| lowered.contains(p)) {
            self.escalate(ctx, IncidentCategory::InappropriateContent, Severity::Medium)
                .await;
            return;
        }

        if contains_personal_info(&lowered) {
            self.escalate(ctx, IncidentCategory::PersonalInfoShared, Severity::Medium)
                .await;
        }
    }

    /// Inspect a gesture identifier
    pub async fn inspect_gesture(&self, ctx: &InspectionContext, gesture: &str) {
        if BLOCKED_GESTURES.contains(&gesture) {
            self.escalate(ctx, IncidentCategory::InappropriateContent, Severity::Medium)
                .await;
        } else {
            debug!("Gesture {} from {} passed screening", gesture, ctx.user_id);
        }
    }

    /// Apply the fixed escalation policy for a classified violation.
    ///
    /// The incident is always appended to the owning classroom's log,
    /// whether or not any live notification target exists.
    async fn escalate(&self, ctx: &InspectionContext, category: IncidentCategory, severity: Severity) {
        let incident =
            SafetyIncident::new(&ctx.user_id, &ctx.classroom_id, category, severity);
        if let Err(e) = self.sessions.record_incident(incident).await {
            warn!(
                "Failed to record incident for classroom {}: {}",
                ctx.classroom_id, e
            );
        }

        match severity {
            Severity::High => {
                self.emergency
                    .force_disconnect(&ctx.connection_id, category.as_str())
                    .await;
                self.relay
                    .alert_moderators(SafetyAlertData {
                        classroom_id: ctx.classroom_id.clone(),
                        user_id: ctx.user_id.clone(),
                        category: category.as_str().to_string(),
                        severity: severity.as_str().to_string(),
                    })
                    .await;
                if ctx.role == Role::Student {
                    self.notify_linked_parent(ctx, category).await;
                }
            }
            Severity::Medium => {
                self.notify_linked_parent(ctx, category).await;
            }
        }
    }

    async fn notify_linked_parent(&self, ctx: &InspectionContext, category: IncidentCategory) {
        if let Some(parent_id) = &ctx.parent_id {
            self.relay
                .alert_parent(
                    parent_id,
                    ParentNotificationData {
                        child_id: ctx.user_id.clone(),
                        event: "safety_incident".to_string(),
                        detail: category.as_str().to_string(),
                    },
                )
                .await;
        }
    }

    async fn mark_voice_verified(&self, ctx: &InspectionContext) {
        self.sessions
            .set_voice_verified(&ctx.classroom_id, &ctx.user_id)
            .await;
    }
}

/// Heuristic screen for personal information a child should not share:
/// phone-number-length digit runs, email shapes, and address phrases.
fn contains_personal_info(content: &str) -> bool {
    let mut digit_run = 0usize;
    for c in content.chars() {
        if c.is_ascii_digit() {
            digit_run += 1;
            if digit_run >= 7 {
                return true;
            }
        } else if c != ' ' && c != '-' {
            digit_run = 0;
        }
    }

    if content.contains('@') && content.contains('.') {
        return true;
    }

    ["my address", "i live at", "my phone number"]
        .iter()
        .any(|p| content.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_personal_info_detection() {
        assert!(contains_personal_info("call me at 555-123-4567"));
        assert!(contains_personal_info("mail me kid@example.com"));
        assert!(contains_personal_info("i live at 4 elm street"));
        assert!(!contains_personal_info("the answer is 42"));
        assert!(!contains_personal_info("nice to meet you"));
    }
}
