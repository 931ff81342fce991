use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<String>,
    pub subject_id: Option<String>,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(name: impl Into<String>, actor_id: Option<String>, subject_id: Option<String>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            occurred_at: Utc::now(),
            actor_id,
            subject_id,
            payload,
        }
    }
}

pub type EventBus = broadcast::Sender<Value>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<Value>) {
    broadcast::channel(1024)
}

/// Structured activity payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPayload {
    /// The current/new state of the entity
    #[serde(rename = "new")]
    pub current: Value,
    /// The previous state, for transitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    pub severity: Severity,
}

/// Publish an activity event for any entity implementing `Loggable`.
///
/// # Arguments
/// * `event_bus` - The event bus to send the event to.
/// * `action` - The action performed (e.g., "created", "approved").
/// * `actor_id` - The user who performed the action.
/// * `entity` - The current entity state.
/// * `old_entity` - Optional previous entity state.
pub fn publish_activity<T: Loggable>(
    event_bus: &EventBus,
    action: &str,
    actor_id: Option<&str>,
    entity: &T,
    old_entity: Option<&T>,
) {
    // Build event name like "approval.created"
    let event_name = format!("{}.{}", T::entity_type(), action);

    let payload = ActivityPayload {
        current: serde_json::to_value(entity).unwrap_or_default(),
        old: old_entity.map(|e| serde_json::to_value(e).unwrap_or_default()),
        severity: entity.severity_for_action(action),
    };

    let event = DomainEvent::new(
        event_name,
        actor_id.map(str::to_string),
        Some(entity.subject_id()),
        serde_json::to_value(&payload).unwrap_or_default(),
    );

    // Fire and forget; no subscribers is not an error
    let _ = event_bus.send(serde_json::to_value(event).unwrap_or_default());
}

/// Drains the event bus into the structured log until the bus closes.
pub async fn start_activity_listener(mut rx: broadcast::Receiver<Value>) {
    tracing::info!("Activity listener started");
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "activity listener lagged behind the event bus");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let name = event.get("name").and_then(Value::as_str).unwrap_or("unknown");
        let actor_id = event.get("actor_id").and_then(Value::as_str).unwrap_or("-");
        let subject_id = event.get("subject_id").and_then(Value::as_str).unwrap_or("-");
        let severity = event
            .get("payload")
            .and_then(|p| p.get("severity"))
            .and_then(Value::as_str)
            .unwrap_or("important");

        match severity {
            "critical" => tracing::info!(event = %name, actor_id = %actor_id, subject_id = %subject_id, severity, "activity"),
            "noise" => tracing::trace!(event = %name, actor_id = %actor_id, subject_id = %subject_id, severity, "activity"),
            _ => tracing::debug!(event = %name, actor_id = %actor_id, subject_id = %subject_id, severity, "activity"),
        }
    }
    tracing::info!("Activity listener stopped");
}
