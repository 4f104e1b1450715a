//! Notification dispatch
//!
//! The dispatcher turns a [`NewNotification`] into exactly one persisted
//! [`Notification`]. It does not interpret content; the per-event wording is
//! built by the functions in [`messages`].

use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::db::{DatabaseBackend, NotificationFilter};
use crate::error::{require_actor, Result, WorkflowError};
use crate::models::{EntityKind, NewNotification, Notification};

/// Where notifications are delivered
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Sink that writes notifications to the `notifications` table
pub struct StoreSink {
    db: Arc<dyn DatabaseBackend>,
}

impl StoreSink {
    pub fn new(db: Arc<dyn DatabaseBackend>) -> Self {
        Self { db }
    }
}

impl NotificationSink for StoreSink {
    fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        self.db.insert_notification(notification)?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    db: Arc<dyn DatabaseBackend>,
    sink: Arc<dyn NotificationSink>,
}

impl NotificationDispatcher {
    /// Dispatcher that persists into `db`
    pub fn new(db: Arc<dyn DatabaseBackend>) -> Self {
        let sink = Arc::new(StoreSink::new(Arc::clone(&db)));
        Self { db, sink }
    }

    /// Dispatcher with a custom delivery sink; recipient queries still read `db`
    pub fn with_sink(db: Arc<dyn DatabaseBackend>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { db, sink }
    }

    /// Persists one notification and returns its id.
    ///
    /// Delivery failures come back as `NotificationDeliveryFailed`; callers
    /// inside a workflow log them instead of failing their own operation.
    pub fn notify(&self, draft: NewNotification) -> Result<Uuid> {
        require_actor("recipient_id", &draft.recipient_id)?;

        let notification = draft.into_notification();
        self.sink
            .deliver(&notification)
            .map_err(|source| WorkflowError::NotificationDeliveryFailed {
                recipient_id: notification.recipient_id.clone(),
                source,
            })?;

        debug!(
            notification_id = %notification.id,
            recipient_id = %notification.recipient_id,
            category = %notification.category,
            "notification delivered"
        );
        Ok(notification.id)
    }

    /// Notifications for a recipient, newest first
    pub fn list_for_recipient(&self, recipient_id: &str, unread_only: bool) -> Result<Vec<Notification>> {
        let mut filter = NotificationFilter::recipient(recipient_id);
        if unread_only {
            filter = filter.unread();
        }
        let mut notifications = self.db.list_notifications(&filter)?;
        notifications.reverse();
        Ok(notifications)
    }

    pub fn unread_count(&self, recipient_id: &str) -> Result<usize> {
        Ok(self
            .db
            .list_notifications(&NotificationFilter::recipient(recipient_id).unread())?
            .len())
    }

    /// Marks one of the recipient's notifications read. A notification that
    /// belongs to someone else is reported as not found.
    pub fn mark_read(&self, notification_id: &Uuid, recipient_id: &str) -> Result<()> {
        if self.db.mark_notification_read(notification_id, recipient_id)? == 0 {
            return Err(WorkflowError::not_found(EntityKind::Notification, *notification_id));
        }
        Ok(())
    }

    /// Returns how many notifications changed
    pub fn mark_all_read(&self, recipient_id: &str) -> Result<usize> {
        Ok(self.db.mark_all_notifications_read(recipient_id)?)
    }
}

/// Wording for each workflow event
pub mod messages {
    use crate::models::{
        EntityKind, ManagedRelationship, NewNotification, NotificationCategory, Request,
        RequestStatus,
    };

    fn with_quote(text: String, quote: Option<&str>) -> String {
        match quote.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => format!("{}\n\n\"{}\"", text, q),
            None => text,
        }
    }

    fn request_link(base_path: &str, request: &Request) -> String {
        format!("{}/{}", base_path.trim_end_matches('/'), request.id)
    }

    /// To the administrator, when a member asks to be managed
    pub fn request_created(request: &Request, base_path: &str) -> NewNotification {
        let message = with_quote(
            format!(
                "{} has asked you to manage their incident reports.",
                request.requester_id
            ),
            request.request_message.as_deref(),
        );
        NewNotification::new(
            &request.target_id,
            NotificationCategory::AdminRequest,
            "New administrator request",
            message,
        )
        .related(EntityKind::Request, request.id)
        .action(request_link(base_path, request), "Review request")
    }

    /// To the requester, once the request is accepted or rejected.
    /// `request` must already carry its terminal status.
    pub fn request_resolved(request: &Request, base_path: &str) -> NewNotification {
        let (category, title, text) = if request.status == RequestStatus::Accepted {
            (
                NotificationCategory::RequestAccepted,
                "Administrator request accepted",
                format!(
                    "{} accepted your request and now manages your incident reports.",
                    request.target_id
                ),
            )
        } else {
            (
                NotificationCategory::RequestRejected,
                "Administrator request rejected",
                format!("{} declined your request to manage your incident reports.", request.target_id),
            )
        };

        NewNotification::new(
            &request.requester_id,
            category,
            title,
            with_quote(text, request.response_message.as_deref()),
        )
        .related(EntityKind::Request, request.id)
        .action(request_link(base_path, request), "View request")
    }

    /// To the member, when their managed relationship ends
    pub fn relationship_ended(relationship: &ManagedRelationship, reason: Option<&str>) -> NewNotification {
        let text = format!(
            "Your management relationship with {} has ended.",
            relationship.administrator_id
        );
        NewNotification::new(
            &relationship.member_id,
            NotificationCategory::RelationshipEnded,
            "Management relationship ended",
            with_quote(text, reason),
        )
        .related(EntityKind::Relationship, relationship.id)
    }
}
