use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{Notification, NotificationPayload, NotificationTransport};
use crate::authz::CurrentUser;
use crate::errors::{AppError, AppResult};
use crate::store::{collections, ConditionalWrite, DocumentStore, Precondition, Query, SortDirection, WriteOutcome};

pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn DocumentStore>,
    transport: Arc<dyn NotificationTransport>,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn DocumentStore>, transport: Arc<dyn NotificationTransport>, timeout: Duration) -> Self {
        Self {
            store,
            transport,
            timeout,
        }
    }

    /// Store one notification per recipient, then deliver them in the
    /// background. Never fails; problems are logged.
    ///
    /// Returns the stored notifications and the handle of the delivery task.
    pub async fn notify(
        &self,
        user_ids: &BTreeSet<String>,
        payload: &NotificationPayload,
    ) -> (Vec<Notification>, Option<JoinHandle<()>>) {
        let mut stored = Vec::with_capacity(user_ids.len());

        for user_id in user_ids {
            let notification = Notification {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.clone(),
                title: payload.title.clone(),
                description: payload.description.clone(),
                kind: payload.kind,
                read: false,
                created_at: Utc::now(),
                link: payload.link.clone(),
            };

            match self.store_notification(&notification).await {
                Ok(()) => stored.push(notification),
                Err(err) => {
                    let err = AppError::delivery(format!("storing notification for {user_id}: {err}"));
                    tracing::warn!(user_id = %user_id, error = %err, "notification dropped");
                }
            }
        }

        if stored.is_empty() {
            return (stored, None);
        }

        let transport = Arc::clone(&self.transport);
        let timeout = self.timeout;
        let batch = stored.clone();
        let handle = tokio::spawn(async move {
            for notification in batch {
                match tokio::time::timeout(timeout, transport.deliver(&notification)).await {
                    Ok(Ok(())) => {
                        tracing::debug!(
                            notification_id = %notification.id,
                            user_id = %notification.user_id,
                            transport = transport.name(),
                            "notification delivered"
                        );
                    }
                    Ok(Err(err)) => {
                        let err = AppError::delivery(err.to_string());
                        tracing::warn!(
                            notification_id = %notification.id,
                            user_id = %notification.user_id,
                            transport = transport.name(),
                            error = %err,
                            "notification delivery failed"
                        );
                    }
                    Err(_) => {
                        let err = AppError::delivery(format!("timed out after {}ms", timeout.as_millis()));
                        tracing::warn!(
                            notification_id = %notification.id,
                            user_id = %notification.user_id,
                            transport = transport.name(),
                            error = %err,
                            "notification delivery failed"
                        );
                    }
                }
            }
        });

        (stored, Some(handle))
    }

    async fn store_notification(&self, notification: &Notification) -> AppResult<()> {
        let body = serde_json::to_value(notification)?;
        self.store
            .insert(collections::USER_NOTIFICATIONS, &notification.id, body)
            .await
    }

    /// Newest first.
    pub async fn list_for_user(&self, user_id: &str, limit: usize) -> AppResult<Vec<Notification>> {
        let query = Query::collection(collections::USER_NOTIFICATIONS)
            .where_eq("userId", user_id)
            .order_by("createdAt", SortDirection::Desc)
            .limit(limit);

        self.store
            .query(&query)
            .await?
            .into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(AppError::from))
            .collect()
    }

    pub async fn unread_count(&self, user_id: &str) -> AppResult<usize> {
        let query = Query::collection(collections::USER_NOTIFICATIONS)
            .where_eq("userId", user_id)
            .where_eq("read", false);
        Ok(self.store.query(&query).await?.len())
    }

    /// Only the recipient may flip the `read` flag.
    pub async fn mark_read(&self, user: &CurrentUser, notification_id: &str) -> AppResult<Notification> {
        let doc = self
            .store
            .get(collections::USER_NOTIFICATIONS, notification_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("notification {notification_id}")))?;

        let notification: Notification = serde_json::from_value(doc)?;
        if notification.user_id != user.id {
            tracing::debug!(
                user_id = %user.id,
                notification_id = %notification_id,
                "permission denied: not the recipient"
            );
            return Err(AppError::forbidden("only the recipient can update a notification"));
        }

        let write = ConditionalWrite::new(collections::USER_NOTIFICATIONS, notification_id)
            .precondition(Precondition::none().field_equals("userId", user.id.as_str()))
            .set("read", true);

        match self.store.transactional_update(write).await? {
            WriteOutcome::Committed(doc) => Ok(serde_json::from_value(doc)?),
            WriteOutcome::NotFound => Err(AppError::not_found(format!("notification {notification_id}"))),
            WriteOutcome::PreconditionFailed => Err(AppError::forbidden("only the recipient can update a notification")),
        }
    }
}
