use async_trait::async_trait;

use super::Notification;
use crate::errors::AppResult;
use crate::events::{publish_activity, EventBus};

/// Push / email / in-app delivery, injected by the host application.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, notification: &Notification) -> AppResult<()>;
}

/// Publishes each notification onto the in-process event bus.
#[derive(Debug, Clone)]
pub struct InAppTransport {
    bus: EventBus,
}

impl InAppTransport {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl NotificationTransport for InAppTransport {
    fn name(&self) -> &'static str {
        "in_app"
    }

    async fn deliver(&self, notification: &Notification) -> AppResult<()> {
        publish_activity(&self.bus, "delivered", None, notification, None);
        Ok(())
    }
}

/// Stores only; used when no transport is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransport;

#[async_trait]
impl NotificationTransport for NoopTransport {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn deliver(&self, _notification: &Notification) -> AppResult<()> {
        Ok(())
    }
}
