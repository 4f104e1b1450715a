//! Database abstraction traits
//!
//! This module defines the core trait that all storage backends must implement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::{
    Incident, LedgerSnapshot, ManagedRelationship, Notification, RelationshipStatus, Request,
    RequestTransition,
};

use super::filters::{IncidentFilter, NotificationFilter, RelationshipFilter, RequestFilter};

/// Types of database backends available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// YAML file storage (single file)
    Yaml,
    /// SQLite database storage
    Sqlite,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendType::Yaml => write!(f, "YAML"),
            BackendType::Sqlite => write!(f, "SQLite"),
        }
    }
}

/// Configuration for database backends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to the database file
    pub path: PathBuf,
    /// Backend type; inferred from the file extension when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_type: Option<BackendType>,
    /// Whether to enable write-ahead logging (SQLite only)
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

fn default_wal_mode() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("propman.db"),
            backend_type: None,
            wal_mode: true,
        }
    }
}

/// Closure run by [`DatabaseBackend::apply`]; returns the number of rows it changed
pub type Mutation<'a> = dyn FnMut(&mut LedgerSnapshot) -> StoreResult<usize> + 'a;

/// Core trait for database backends
///
/// The design philosophy is:
/// - `load()`, `save()` and `apply()` work with the full `LedgerSnapshot`
/// - Per-table operations have default implementations on top of those three,
///   so a snapshot backend is correct as long as `apply()` is atomic
/// - Backends with a query engine override the per-table operations
///
/// Every conditional write (`transition_request`, `update_relationship_status`,
/// `end_relationship`, `claim_incidents`) evaluates its predicate and applies its
/// patch as one atomic step and reports how many rows it changed.
pub trait DatabaseBackend: Send + Sync {
    /// Returns the backend type
    fn backend_type(&self) -> BackendType;

    /// Returns the path to the database file
    fn path(&self) -> &std::path::Path;

    // =========================================================================
    // Full Store Operations
    // =========================================================================

    /// Loads the entire store
    fn load(&self) -> StoreResult<LedgerSnapshot>;

    /// Replaces the entire store
    fn save(&self, snapshot: &LedgerSnapshot) -> StoreResult<()>;

    /// Runs `mutation` against the current snapshot atomically.
    /// Changes are persisted only if the mutation returns `Ok`.
    fn apply(&self, mutation: &mut Mutation<'_>) -> StoreResult<usize>;

    // =========================================================================
    // Requests
    // =========================================================================

    /// Inserts a request. At most one pending request may exist per
    /// (requester, target) pair; a second one is a `StoreError::Conflict`.
    fn insert_request(&self, request: &Request) -> StoreResult<()> {
        self.apply(&mut |snapshot| {
            if snapshot.requests.iter().any(|r| r.id == request.id) {
                return Err(StoreError::Conflict(format!("request {} already exists", request.id)));
            }
            if request.is_pending()
                && snapshot
                    .requests
                    .iter()
                    .any(|r| r.is_pending() && r.is_between(&request.requester_id, &request.target_id))
            {
                return Err(StoreError::Conflict(format!(
                    "pending request already exists for {} -> {}",
                    request.requester_id, request.target_id
                )));
            }
            snapshot.requests.push(request.clone());
            Ok(1)
        })
        .map(|_| ())
    }

    fn get_request(&self, id: &Uuid) -> StoreResult<Option<Request>> {
        let snapshot = self.load()?;
        Ok(snapshot.requests.into_iter().find(|r| &r.id == id))
    }

    /// Requests matching `filter`, oldest first
    fn list_requests(&self, filter: &RequestFilter) -> StoreResult<Vec<Request>> {
        let snapshot = self.load()?;
        let mut requests: Vec<Request> = snapshot
            .requests
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        requests.sort_by_key(|r| r.requested_at);
        Ok(requests)
    }

    /// Applies `transition` only if the request is still pending
    fn transition_request(&self, id: &Uuid, transition: &RequestTransition) -> StoreResult<usize> {
        self.apply(&mut |snapshot| {
            match snapshot
                .requests
                .iter_mut()
                .find(|r| &r.id == id && r.is_pending())
            {
                Some(request) => {
                    transition.apply_to(request);
                    Ok(1)
                }
                None => Ok(0),
            }
        })
    }

    // =========================================================================
    // Relationships
    // =========================================================================

    /// Inserts a relationship. At most one active relationship may exist per
    /// (administrator, member) pair; a second one is a `StoreError::Conflict`.
    fn insert_relationship(&self, relationship: &ManagedRelationship) -> StoreResult<()> {
        self.apply(&mut |snapshot| {
            if snapshot.relationships.iter().any(|r| r.id == relationship.id) {
                return Err(StoreError::Conflict(format!(
                    "relationship {} already exists",
                    relationship.id
                )));
            }
            if relationship.is_active()
                && snapshot.relationships.iter().any(|r| {
                    r.is_active() && r.is_between(&relationship.administrator_id, &relationship.member_id)
                })
            {
                return Err(StoreError::Conflict(format!(
                    "active relationship already exists for {} -> {}",
                    relationship.administrator_id, relationship.member_id
                )));
            }
            snapshot.relationships.push(relationship.clone());
            Ok(1)
        })
        .map(|_| ())
    }

    fn get_relationship(&self, id: &Uuid) -> StoreResult<Option<ManagedRelationship>> {
        let snapshot = self.load()?;
        Ok(snapshot.relationships.into_iter().find(|r| &r.id == id))
    }

    /// Relationships matching `filter`, oldest first
    fn list_relationships(&self, filter: &RelationshipFilter) -> StoreResult<Vec<ManagedRelationship>> {
        let snapshot = self.load()?;
        let mut relationships: Vec<ManagedRelationship> = snapshot
            .relationships
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        relationships.sort_by_key(|r| r.established_at);
        Ok(relationships)
    }

    /// Moves a relationship from `from` to `to` only if it is currently `from`
    fn update_relationship_status(
        &self,
        id: &Uuid,
        from: RelationshipStatus,
        to: RelationshipStatus,
    ) -> StoreResult<usize> {
        self.apply(&mut |snapshot| {
            let Some(index) = snapshot
                .relationships
                .iter()
                .position(|r| &r.id == id && r.status == from)
            else {
                return Ok(0);
            };
            if to == RelationshipStatus::Active {
                let current = &snapshot.relationships[index];
                let clash = snapshot.relationships.iter().any(|r| {
                    r.id != current.id
                        && r.is_active()
                        && r.is_between(&current.administrator_id, &current.member_id)
                });
                if clash {
                    return Err(StoreError::Conflict(format!(
                        "active relationship already exists for {} -> {}",
                        current.administrator_id, current.member_id
                    )));
                }
            }
            snapshot.relationships[index].status = to;
            Ok(1)
        })
    }

    /// Marks a relationship inactive with the given notes, only if it is not inactive yet
    fn end_relationship(&self, id: &Uuid, notes: &str, ended_at: DateTime<Utc>) -> StoreResult<usize> {
        self.apply(&mut |snapshot| {
            match snapshot
                .relationships
                .iter_mut()
                .find(|r| &r.id == id && r.status != RelationshipStatus::Inactive)
            {
                Some(relationship) => {
                    relationship.status = RelationshipStatus::Inactive;
                    relationship.notes = notes.to_string();
                    relationship.ended_at = Some(ended_at);
                    Ok(1)
                }
                None => Ok(0),
            }
        })
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    fn insert_notification(&self, notification: &Notification) -> StoreResult<()> {
        self.apply(&mut |snapshot| {
            if snapshot.notifications.iter().any(|n| n.id == notification.id) {
                return Err(StoreError::Conflict(format!(
                    "notification {} already exists",
                    notification.id
                )));
            }
            snapshot.notifications.push(notification.clone());
            Ok(1)
        })
        .map(|_| ())
    }

    fn get_notification(&self, id: &Uuid) -> StoreResult<Option<Notification>> {
        let snapshot = self.load()?;
        Ok(snapshot.notifications.into_iter().find(|n| &n.id == id))
    }

    /// Notifications matching `filter`, oldest first
    fn list_notifications(&self, filter: &NotificationFilter) -> StoreResult<Vec<Notification>> {
        let snapshot = self.load()?;
        let mut notifications: Vec<Notification> = snapshot
            .notifications
            .into_iter()
            .filter(|n| filter.matches(n))
            .collect();
        notifications.sort_by_key(|n| n.created_at);
        Ok(notifications)
    }

    /// Sets the read flag on a notification owned by `recipient_id`
    fn mark_notification_read(&self, id: &Uuid, recipient_id: &str) -> StoreResult<usize> {
        self.apply(&mut |snapshot| {
            match snapshot
                .notifications
                .iter_mut()
                .find(|n| &n.id == id && n.recipient_id == recipient_id)
            {
                Some(notification) => {
                    notification.read = true;
                    Ok(1)
                }
                None => Ok(0),
            }
        })
    }

    /// Marks every unread notification of `recipient_id` read
    fn mark_all_notifications_read(&self, recipient_id: &str) -> StoreResult<usize> {
        self.apply(&mut |snapshot| {
            let mut changed = 0;
            for notification in snapshot
                .notifications
                .iter_mut()
                .filter(|n| n.recipient_id == recipient_id && !n.read)
            {
                notification.read = true;
                changed += 1;
            }
            Ok(changed)
        })
    }

    // =========================================================================
    // Incidents
    // =========================================================================

    fn insert_incident(&self, incident: &Incident) -> StoreResult<()> {
        self.apply(&mut |snapshot| {
            if snapshot.incidents.iter().any(|i| i.id == incident.id) {
                return Err(StoreError::Conflict(format!("incident {} already exists", incident.id)));
            }
            snapshot.incidents.push(incident.clone());
            Ok(1)
        })
        .map(|_| ())
    }

    fn get_incident(&self, id: &Uuid) -> StoreResult<Option<Incident>> {
        let snapshot = self.load()?;
        Ok(snapshot.incidents.into_iter().find(|i| &i.id == id))
    }

    /// Incidents matching `filter`, oldest first
    fn list_incidents(&self, filter: &IncidentFilter) -> StoreResult<Vec<Incident>> {
        let snapshot = self.load()?;
        let mut incidents: Vec<Incident> = snapshot
            .incidents
            .into_iter()
            .filter(|i| filter.matches(i))
            .collect();
        incidents.sort_by_key(|i| i.created_at);
        Ok(incidents)
    }

    /// Assigns the given incidents to `administrator_id`, restricted to rows whose
    /// assignment is still null. Returns the number of incidents actually claimed.
    fn claim_incidents(
        &self,
        administrator_id: &str,
        ids: &[Uuid],
        claimed_at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.apply(&mut |snapshot| {
            let mut claimed = 0;
            for incident in snapshot
                .incidents
                .iter_mut()
                .filter(|i| i.is_unclaimed() && ids.contains(&i.id))
            {
                incident.assigned_administrator_id = Some(administrator_id.to_string());
                incident.updated_at = claimed_at;
                claimed += 1;
            }
            Ok(claimed)
        })
    }

    // =========================================================================
    // Utility Operations
    // =========================================================================

    /// Returns true if the database file exists
    fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Creates the database with empty data if it doesn't exist
    fn create_if_not_exists(&self) -> StoreResult<()> {
        if !self.exists() {
            self.save(&LedgerSnapshot::new())?;
        }
        Ok(())
    }

    /// Returns statistics about the database
    fn stats(&self) -> StoreResult<DatabaseStats> {
        let snapshot = self.load()?;
        Ok(DatabaseStats {
            request_count: snapshot.requests.len(),
            pending_request_count: snapshot.requests.iter().filter(|r| r.is_pending()).count(),
            relationship_count: snapshot.relationships.len(),
            active_relationship_count: snapshot.relationships.iter().filter(|r| r.is_active()).count(),
            notification_count: snapshot.notifications.len(),
            incident_count: snapshot.incidents.len(),
            unclaimed_incident_count: snapshot.incidents.iter().filter(|i| i.is_unclaimed()).count(),
            backend_type: self.backend_type(),
        })
    }
}

/// Statistics about a database
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseStats {
    pub request_count: usize,
    pub pending_request_count: usize,
    pub relationship_count: usize,
    pub active_relationship_count: usize,
    pub notification_count: usize,
    pub incident_count: usize,
    pub unclaimed_incident_count: usize,
    pub backend_type: BackendType,
}
