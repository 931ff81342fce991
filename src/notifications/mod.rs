//! Best-effort notification fan-out.
//!
//! Notifications are stored as `userNotifications` documents and then handed
//! to a transport on a detached task. Nothing in here can fail a workflow
//! transition.

mod directory;
mod dispatcher;
mod transport;

pub use directory::{ApproverDirectory, StaticUserDirectory};
pub use dispatcher::NotificationDispatcher;
pub use transport::{InAppTransport, NoopTransport, NotificationTransport};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::events::Loggable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ApprovalRequired,
    ApprovalApproved,
    ApprovalRejected,
    ApprovalCancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl Loggable for Notification {
    fn entity_type() -> &'static str {
        "notification"
    }

    fn subject_id(&self) -> String {
        self.id.clone()
    }
}

/// What the core hands to the dispatcher; one [`Notification`] is built per
/// recipient from it.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationPayload {
    pub title: String,
    pub description: String,
    pub kind: NotificationKind,
    pub link: Option<String>,
}

impl NotificationPayload {
    pub fn new(kind: NotificationKind, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            kind,
            link: None,
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}
