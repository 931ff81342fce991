use serde::{Deserialize, Serialize};

/// Severity levels for activity events.
/// Controls the log level the activity listener uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Terminal decisions and cancellations
    Critical,
    /// Regular workflow progress (default)
    #[default]
    Important,
    /// Delivery chatter
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

/// Trait for entities that can be published on the event bus.
pub trait Loggable: Serialize + Send + Sync {
    /// The entity type name (e.g., "approval", "notification").
    /// This becomes the prefix in event names like "approval.created"
    fn entity_type() -> &'static str;

    /// The subject ID (usually the document id)
    fn subject_id(&self) -> String;

    /// Severity level for events (defaults to Important)
    fn severity(&self) -> Severity {
        Severity::Important
    }

    /// Override severity based on action
    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "approved" | "rejected" | "cancelled" => Severity::Critical,
            "delivered" => Severity::Noise,
            _ => self.severity(),
        }
    }
}
