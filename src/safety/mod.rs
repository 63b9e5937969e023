//! Child-safety monitoring and emergency disconnect

pub mod classifier;
pub mod emergency;
pub mod monitor;
pub mod relay;

pub use classifier::{ScriptedClassifier, VoiceClassification, VoiceSafetyClassifier};
pub use emergency::{EmergencyController, SharedEmergencyController};
pub use monitor::{InspectionContext, SafetyMonitor};
pub use relay::{NotificationRelay, SharedNotificationRelay};
