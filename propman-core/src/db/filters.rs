//! Typed predicates for store scans
//!
//! Every field left as `None` matches all rows. Backends translate these into
//! native queries; the `matches` methods are the reference semantics used by
//! whole-snapshot backends.

use crate::models::{Incident, ManagedRelationship, Notification, Request, RequestStatus, RelationshipStatus};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestFilter {
    pub requester_id: Option<String>,
    pub target_id: Option<String>,
    pub status: Option<RequestStatus>,
}

impl RequestFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requester(mut self, requester_id: &str) -> Self {
        self.requester_id = Some(requester_id.to_string());
        self
    }

    pub fn target(mut self, target_id: &str) -> Self {
        self.target_id = Some(target_id.to_string());
        self
    }

    pub fn status(mut self, status: RequestStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, request: &Request) -> bool {
        self.requester_id.as_deref().map_or(true, |r| request.requester_id == r)
            && self.target_id.as_deref().map_or(true, |t| request.target_id == t)
            && self.status.map_or(true, |s| request.status == s)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipFilter {
    pub administrator_id: Option<String>,
    pub member_id: Option<String>,
    pub status: Option<RelationshipStatus>,
}

impl RelationshipFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn administrator(mut self, administrator_id: &str) -> Self {
        self.administrator_id = Some(administrator_id.to_string());
        self
    }

    pub fn member(mut self, member_id: &str) -> Self {
        self.member_id = Some(member_id.to_string());
        self
    }

    pub fn status(mut self, status: RelationshipStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, relationship: &ManagedRelationship) -> bool {
        self.administrator_id
            .as_deref()
            .map_or(true, |a| relationship.administrator_id == a)
            && self.member_id.as_deref().map_or(true, |m| relationship.member_id == m)
            && self.status.map_or(true, |s| relationship.status == s)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationFilter {
    pub recipient_id: Option<String>,
    pub unread_only: bool,
}

impl NotificationFilter {
    pub fn recipient(recipient_id: &str) -> Self {
        Self {
            recipient_id: Some(recipient_id.to_string()),
            unread_only: false,
        }
    }

    pub fn unread(mut self) -> Self {
        self.unread_only = true;
        self
    }

    pub fn matches(&self, notification: &Notification) -> bool {
        self.recipient_id
            .as_deref()
            .map_or(true, |r| notification.recipient_id == r)
            && (!self.unread_only || !notification.read)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncidentFilter {
    /// Restrict to these reporters; an empty list matches nothing
    pub reporter_ids: Option<Vec<String>>,
    pub assigned_administrator_id: Option<String>,
    pub unassigned_only: bool,
}

impl IncidentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reporters<I, S>(mut self, reporter_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reporter_ids = Some(reporter_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn assigned_to(mut self, administrator_id: &str) -> Self {
        self.assigned_administrator_id = Some(administrator_id.to_string());
        self
    }

    pub fn unassigned(mut self) -> Self {
        self.unassigned_only = true;
        self
    }

    pub fn matches(&self, incident: &Incident) -> bool {
        self.reporter_ids
            .as_ref()
            .map_or(true, |ids| ids.iter().any(|id| *id == incident.reporter_id))
            && self
                .assigned_administrator_id
                .as_deref()
                .map_or(true, |a| incident.assigned_administrator_id.as_deref() == Some(a))
            && (!self.unassigned_only || incident.is_unclaimed())
    }
}
