use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Status of an administrator request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    /// Parses the storage representation (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(RequestStatus::Pending),
            "accepted" => Some(RequestStatus::Accepted),
            "rejected" => Some(RequestStatus::Rejected),
            "cancelled" | "canceled" => Some(RequestStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The counterpart's answer to a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    Rejected,
}

impl Decision {
    pub fn status(self) -> RequestStatus {
        match self {
            Decision::Accepted => RequestStatus::Accepted,
            Decision::Rejected => RequestStatus::Rejected,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "accept" | "accepted" => Some(Decision::Accepted),
            "reject" | "rejected" => Some(Decision::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status())
    }
}

/// A community member's request that an administrator manage their incidents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    /// Unique identifier for the request
    pub id: Uuid,

    /// Community member asking to be managed
    pub requester_id: String,

    /// Property administrator being asked
    pub target_id: String,

    /// Community the request is scoped to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community_id: Option<String>,

    pub status: RequestStatus,

    /// Free text from the requester
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_message: Option<String>,

    /// Free text from the responder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_message: Option<String>,

    pub requested_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder_id: Option<String>,
}

impl Request {
    /// Creates a new pending request stamped with the current time
    pub fn new(requester_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester_id: requester_id.into(),
            target_id: target_id.into(),
            community_id: None,
            status: RequestStatus::Pending,
            request_message: None,
            response_message: None,
            requested_at: Utc::now(),
            responded_at: None,
            responder_id: None,
        }
    }

    pub fn with_community(mut self, community_id: Option<String>) -> Self {
        self.community_id = community_id;
        self
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.request_message = message;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// True if this request is between the given requester and target
    pub fn is_between(&self, requester_id: &str, target_id: &str) -> bool {
        self.requester_id == requester_id && self.target_id == target_id
    }
}

/// The patch written when a pending request becomes terminal
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTransition {
    pub status: RequestStatus,
    pub responder_id: Option<String>,
    pub response_message: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl RequestTransition {
    /// A counterpart's accept/reject answer
    pub fn resolve(decision: Decision, responder_id: &str, response_message: Option<String>) -> Self {
        Self {
            status: decision.status(),
            responder_id: Some(responder_id.to_string()),
            response_message,
            responded_at: Some(Utc::now()),
        }
    }

    /// The requester's withdrawal; leaves responder fields untouched
    pub fn cancel() -> Self {
        Self {
            status: RequestStatus::Cancelled,
            responder_id: None,
            response_message: None,
            responded_at: None,
        }
    }

    pub fn apply_to(&self, request: &mut Request) {
        request.status = self.status;
        request.responder_id = self.responder_id.clone();
        request.response_message = self.response_message.clone();
        request.responded_at = self.responded_at;
    }
}

/// Status of a managed relationship
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStatus {
    Active,
    Inactive,
    Suspended,
}

impl RelationshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipStatus::Active => "active",
            RelationshipStatus::Inactive => "inactive",
            RelationshipStatus::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(RelationshipStatus::Active),
            "inactive" => Some(RelationshipStatus::Inactive),
            "suspended" => Some(RelationshipStatus::Suspended),
            _ => None,
        }
    }
}

impl fmt::Display for RelationshipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The durable pairing between one administrator and one member
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagedRelationship {
    pub id: Uuid,
    pub administrator_id: String,
    pub member_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community_id: Option<String>,

    pub status: RelationshipStatus,
    pub established_at: DateTime<Utc>,

    /// Actor whose decision created the relationship
    pub established_by: String,

    #[serde(default)]
    pub notes: String,

    /// Set once, when the relationship is terminated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ManagedRelationship {
    pub fn new(
        administrator_id: impl Into<String>,
        member_id: impl Into<String>,
        established_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            administrator_id: administrator_id.into(),
            member_id: member_id.into(),
            community_id: None,
            status: RelationshipStatus::Active,
            established_at: Utc::now(),
            established_by: established_by.into(),
            notes: String::new(),
            ended_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RelationshipStatus::Active
    }

    pub fn is_between(&self, administrator_id: &str, member_id: &str) -> bool {
        self.administrator_id == administrator_id && self.member_id == member_id
    }

    /// True if the relationship existed at or after `instant`
    pub fn covers(&self, instant: DateTime<Utc>) -> bool {
        match self.ended_at {
            None => self.status != RelationshipStatus::Inactive,
            Some(ended) => ended >= instant,
        }
    }

    /// Notes with `addition` appended on its own line
    pub fn notes_with(&self, addition: &str) -> String {
        if self.notes.is_empty() {
            addition.to_string()
        } else {
            format!("{}\n{}", self.notes, addition)
        }
    }
}

/// Kinds of record this engine addresses by id
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[serde(rename = "administrator_request")]
    Request,
    #[serde(rename = "managed_relationship")]
    Relationship,
    Notification,
    Incident,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Request => "administrator_request",
            EntityKind::Relationship => "managed_relationship",
            EntityKind::Notification => "notification",
            EntityKind::Incident => "incident",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "administrator_request" => Some(EntityKind::Request),
            "managed_relationship" => Some(EntityKind::Relationship),
            "notification" => Some(EntityKind::Notification),
            "incident" => Some(EntityKind::Incident),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Category tag carried by every notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    AdminRequest,
    RequestAccepted,
    RequestRejected,
    RelationshipEnded,
    System,
}

impl NotificationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationCategory::AdminRequest => "admin_request",
            NotificationCategory::RequestAccepted => "request_accepted",
            NotificationCategory::RequestRejected => "request_rejected",
            NotificationCategory::RelationshipEnded => "relationship_ended",
            NotificationCategory::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin_request" => Some(NotificationCategory::AdminRequest),
            "request_accepted" => Some(NotificationCategory::RequestAccepted),
            "request_rejected" => Some(NotificationCategory::RequestRejected),
            "relationship_ended" => Some(NotificationCategory::RelationshipEnded),
            "system" => Some(NotificationCategory::System),
            _ => None,
        }
    }
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record a notification points at
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelatedEntity {
    pub kind: EntityKind,
    pub id: Uuid,
}

/// Call-to-action attached to a notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationAction {
    pub url: String,
    pub label: String,
}

/// A user-facing message addressed to one actor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: String,
    pub title: String,
    pub message: String,
    pub category: NotificationCategory,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<RelatedEntity>,

    #[serde(default)]
    pub read: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<NotificationAction>,

    pub created_at: DateTime<Utc>,
}

/// A notification that has not been persisted yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub recipient_id: String,
    pub title: String,
    pub message: String,
    pub category: NotificationCategory,
    pub related: Option<RelatedEntity>,
    pub action: Option<NotificationAction>,
}

impl NewNotification {
    pub fn new(
        recipient_id: impl Into<String>,
        category: NotificationCategory,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            title: title.into(),
            message: message.into(),
            category,
            related: None,
            action: None,
        }
    }

    pub fn related(mut self, kind: EntityKind, id: Uuid) -> Self {
        self.related = Some(RelatedEntity { kind, id });
        self
    }

    pub fn action(mut self, url: impl Into<String>, label: impl Into<String>) -> Self {
        self.action = Some(NotificationAction {
            url: url.into(),
            label: label.into(),
        });
        self
    }

    /// Assigns an id and timestamp; the result starts unread
    pub fn into_notification(self) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            recipient_id: self.recipient_id,
            title: self.title,
            message: self.message,
            category: self.category,
            related: self.related,
            read: false,
            action: self.action,
            created_at: Utc::now(),
        }
    }
}

/// Status of an incident, owned by the reporting subsystem
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Open => "open",
            IncidentStatus::InProgress => "in_progress",
            IncidentStatus::Resolved => "resolved",
            IncidentStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "open" => Some(IncidentStatus::Open),
            "in_progress" | "in-progress" => Some(IncidentStatus::InProgress),
            "resolved" => Some(IncidentStatus::Resolved),
            "closed" => Some(IncidentStatus::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An incident report. Only `assigned_administrator_id` is written by this crate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Incident {
    pub id: Uuid,
    pub reporter_id: String,

    /// None while the incident is unclaimed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_administrator_id: Option<String>,

    pub title: String,
    pub status: IncidentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    pub fn new(reporter_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reporter_id: reporter_id.into(),
            assigned_administrator_id: None,
            title: title.into(),
            status: IncidentStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_unclaimed(&self) -> bool {
        self.assigned_administrator_id.is_none()
    }
}

/// The full content of a store, used for whole-store load/save and migration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub requests: Vec<Request>,
    #[serde(default)]
    pub relationships: Vec<ManagedRelationship>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub incidents: Vec<Incident>,
}

impl LedgerSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
            && self.relationships.is_empty()
            && self.notifications.is_empty()
            && self.incidents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_status_round_trips_through_storage_string() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Accepted,
            RequestStatus::Rejected,
            RequestStatus::Cancelled,
        ] {
            assert_eq!(RequestStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RequestStatus::parse("canceled"), Some(RequestStatus::Cancelled));
        assert_eq!(RequestStatus::parse("unknown"), None);
    }

    #[test]
    fn test_only_pending_is_non_terminal() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(RequestStatus::Accepted.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_cancel_transition_keeps_responder_empty() {
        let mut request = Request::new("m1", "a1");
        RequestTransition::cancel().apply_to(&mut request);
        assert_eq!(request.status, RequestStatus::Cancelled);
        assert!(request.responder_id.is_none());
        assert!(request.responded_at.is_none());
    }

    #[test]
    fn test_relationship_notes_append() {
        let mut rel = ManagedRelationship::new("a1", "m1", "a1");
        assert_eq!(rel.notes_with("first"), "first");
        rel.notes = "first".to_string();
        assert_eq!(rel.notes_with("second"), "first\nsecond");
    }

    #[test]
    fn test_relationship_covers_instant() {
        let mut rel = ManagedRelationship::new("a1", "m1", "a1");
        let before = rel.established_at - chrono::Duration::seconds(10);
        assert!(rel.covers(before));

        rel.status = RelationshipStatus::Inactive;
        rel.ended_at = Some(before - chrono::Duration::seconds(1));
        assert!(!rel.covers(before));
    }

    #[test]
    fn test_snapshot_serializes_to_yaml() {
        let mut snapshot = LedgerSnapshot::new();
        snapshot.requests.push(Request::new("m1", "a1"));
        snapshot
            .notifications
            .push(NewNotification::new("a1", NotificationCategory::AdminRequest, "t", "m").into_notification());

        let yaml = serde_yaml::to_string(&snapshot).unwrap();
        let loaded: LedgerSnapshot = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(loaded, snapshot);
    }
}
