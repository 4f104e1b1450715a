//! Managed relationship lifecycle
//!
//! Relationships are created only through [`RelationshipManager::ensure_active_relationship`],
//! which is idempotent per (administrator, member) pair, and are never deleted:
//! termination marks them inactive and keeps the row as history.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{DatabaseBackend, RelationshipFilter};
use crate::error::{require_actor, Result, WorkflowError};
use crate::models::{EntityKind, ManagedRelationship, RelationshipStatus};
use crate::notifications::{messages, NotificationDispatcher};

#[derive(Clone)]
pub struct RelationshipManager {
    db: Arc<dyn DatabaseBackend>,
    notifier: NotificationDispatcher,
}

impl RelationshipManager {
    pub fn new(db: Arc<dyn DatabaseBackend>, notifier: NotificationDispatcher) -> Self {
        Self { db, notifier }
    }

    /// Returns the id of the active relationship for the pair, creating it if needed.
    ///
    /// An existing active relationship is returned unchanged; its notes are not
    /// overwritten. A previously terminated relationship stays as history and a
    /// new row is created.
    pub fn ensure_active_relationship(
        &self,
        administrator_id: &str,
        member_id: &str,
        community_id: Option<&str>,
        established_by: &str,
        notes: Option<&str>,
    ) -> Result<Uuid> {
        require_actor("administrator_id", administrator_id)?;
        require_actor("member_id", member_id)?;
        require_actor("established_by", established_by)?;

        if let Some(existing) = self.active_relationship_between(administrator_id, member_id)? {
            debug!(
                relationship_id = %existing.id,
                administrator_id,
                member_id,
                "active relationship already exists"
            );
            return Ok(existing.id);
        }

        let mut relationship = ManagedRelationship::new(administrator_id, member_id, established_by);
        relationship.community_id = community_id.map(str::to_string);
        relationship.notes = notes.unwrap_or_default().to_string();

        match self.db.insert_relationship(&relationship) {
            Ok(()) => {
                info!(
                    relationship_id = %relationship.id,
                    administrator_id,
                    member_id,
                    established_by,
                    "relationship created"
                );
                Ok(relationship.id)
            }
            // A concurrent call created it between our lookup and insert
            Err(err) if err.is_conflict() => match self.active_relationship_between(administrator_id, member_id)? {
                Some(existing) => Ok(existing.id),
                None => Err(err.into()),
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Marks a relationship inactive, appending `reason` to its notes.
    ///
    /// Terminating an inactive relationship succeeds without touching it. The
    /// member is notified only by the call that actually ends the relationship.
    pub fn terminate_relationship(&self, relationship_id: &Uuid, reason: Option<&str>) -> Result<ManagedRelationship> {
        let mut relationship = self.get_relationship(relationship_id)?;
        if relationship.status == RelationshipStatus::Inactive {
            debug!(relationship_id = %relationship.id, "relationship already inactive");
            return Ok(relationship);
        }

        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        let notes = match reason {
            Some(r) => relationship.notes_with(&format!("Terminated: {}", r)),
            None => relationship.notes.clone(),
        };
        let ended_at = Utc::now();

        if self.db.end_relationship(relationship_id, &notes, ended_at)? == 0 {
            debug!(relationship_id = %relationship.id, "relationship ended concurrently");
            return self.get_relationship(relationship_id);
        }

        relationship.status = RelationshipStatus::Inactive;
        relationship.notes = notes;
        relationship.ended_at = Some(ended_at);
        info!(
            relationship_id = %relationship.id,
            administrator_id = %relationship.administrator_id,
            member_id = %relationship.member_id,
            "relationship terminated"
        );

        if let Err(err) = self.notifier.notify(messages::relationship_ended(&relationship, reason)) {
            warn!(
                relationship_id = %relationship.id,
                recipient_id = %relationship.member_id,
                error = %err,
                "relationship-ended notification not delivered"
            );
        }

        Ok(relationship)
    }

    /// Pauses an active relationship; suspended relationships do not claim incidents
    pub fn suspend_relationship(&self, relationship_id: &Uuid) -> Result<ManagedRelationship> {
        self.move_status(relationship_id, RelationshipStatus::Active, RelationshipStatus::Suspended, "suspend")
    }

    /// Reactivates a suspended relationship
    pub fn resume_relationship(&self, relationship_id: &Uuid) -> Result<ManagedRelationship> {
        self.move_status(relationship_id, RelationshipStatus::Suspended, RelationshipStatus::Active, "resume")
    }

    fn move_status(
        &self,
        relationship_id: &Uuid,
        from: RelationshipStatus,
        to: RelationshipStatus,
        attempted: &'static str,
    ) -> Result<ManagedRelationship> {
        let mut relationship = self.get_relationship(relationship_id)?;
        let invalid = |current: String| WorkflowError::InvalidStateTransition {
            kind: EntityKind::Relationship,
            id: *relationship_id,
            current,
            attempted,
        };

        if relationship.status != from {
            return Err(invalid(relationship.status.to_string()));
        }

        match self.db.update_relationship_status(relationship_id, from, to) {
            Ok(0) => {
                let current = self.get_relationship(relationship_id)?;
                Err(invalid(current.status.to_string()))
            }
            Ok(_) => {
                relationship.status = to;
                info!(relationship_id = %relationship.id, status = %to, "relationship status changed");
                Ok(relationship)
            }
            Err(err) if err.is_conflict() => Err(invalid(format!(
                "{} while another active relationship exists for the pair",
                from
            ))),
            Err(err) => Err(err.into()),
        }
    }

    pub fn get_relationship(&self, relationship_id: &Uuid) -> Result<ManagedRelationship> {
        self.db
            .get_relationship(relationship_id)?
            .ok_or_else(|| WorkflowError::not_found(EntityKind::Relationship, *relationship_id))
    }

    pub fn active_relationship_between(
        &self,
        administrator_id: &str,
        member_id: &str,
    ) -> Result<Option<ManagedRelationship>> {
        let filter = RelationshipFilter::new()
            .administrator(administrator_id)
            .member(member_id)
            .status(RelationshipStatus::Active);
        Ok(self.db.list_relationships(&filter)?.into_iter().next())
    }

    /// All active relationships of an administrator, read fresh from the store
    pub fn list_active_relationships(&self, administrator_id: &str) -> Result<Vec<ManagedRelationship>> {
        let filter = RelationshipFilter::new()
            .administrator(administrator_id)
            .status(RelationshipStatus::Active);
        Ok(self.db.list_relationships(&filter)?)
    }

    /// Every relationship of an administrator, in any status
    pub fn list_administrator_relationships(&self, administrator_id: &str) -> Result<Vec<ManagedRelationship>> {
        Ok(self
            .db
            .list_relationships(&RelationshipFilter::new().administrator(administrator_id))?)
    }

    /// Every relationship of a member, in any status
    pub fn list_member_relationships(&self, member_id: &str) -> Result<Vec<ManagedRelationship>> {
        Ok(self.db.list_relationships(&RelationshipFilter::new().member(member_id))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NotificationFilter, SqliteBackend};
    use crate::models::NotificationCategory;

    fn manager() -> (Arc<dyn DatabaseBackend>, RelationshipManager) {
        let db: Arc<dyn DatabaseBackend> = Arc::new(SqliteBackend::in_memory().unwrap());
        let notifier = NotificationDispatcher::new(Arc::clone(&db));
        (Arc::clone(&db), RelationshipManager::new(db, notifier))
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let (db, manager) = manager();
        let first = manager
            .ensure_active_relationship("a1", "m1", Some("c1"), "a1", Some("original"))
            .unwrap();
        for _ in 0..4 {
            let again = manager
                .ensure_active_relationship("a1", "m1", None, "a1", Some("overwritten?"))
                .unwrap();
            assert_eq!(again, first);
        }

        let all = db.list_relationships(&RelationshipFilter::new()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].notes, "original");
        assert_eq!(all[0].community_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_ensure_after_termination_creates_new_row() {
        let (db, manager) = manager();
        let first = manager.ensure_active_relationship("a1", "m1", None, "a1", None).unwrap();
        manager.terminate_relationship(&first, Some("moved out")).unwrap();

        let second = manager.ensure_active_relationship("a1", "m1", None, "a1", None).unwrap();
        assert_ne!(first, second);

        let all = db.list_relationships(&RelationshipFilter::new().member("m1")).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(manager.get_relationship(&first).unwrap().status, RelationshipStatus::Inactive);
    }

    #[test]
    fn test_terminate_twice_is_a_no_op() {
        let (db, manager) = manager();
        let id = manager.ensure_active_relationship("a1", "m1", None, "a1", Some("note")).unwrap();

        let ended = manager.terminate_relationship(&id, Some("contract ended")).unwrap();
        assert_eq!(ended.status, RelationshipStatus::Inactive);
        assert_eq!(ended.notes, "note\nTerminated: contract ended");

        let again = manager.terminate_relationship(&id, Some("again")).unwrap();
        assert_eq!(again.notes, ended.notes);
        assert_eq!(again.ended_at, ended.ended_at);

        let inbox = db.list_notifications(&NotificationFilter::recipient("m1")).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].category, NotificationCategory::RelationshipEnded);
    }

    #[test]
    fn test_terminate_unknown_is_not_found() {
        let (_, manager) = manager();
        assert!(matches!(
            manager.terminate_relationship(&Uuid::new_v4(), None).unwrap_err(),
            WorkflowError::NotFound { kind: EntityKind::Relationship, .. }
        ));
    }

    #[test]
    fn test_suspended_relationships_are_not_listed_active() {
        let (_, manager) = manager();
        let id = manager.ensure_active_relationship("a1", "m1", None, "a1", None).unwrap();
        manager.ensure_active_relationship("a1", "m2", None, "a1", None).unwrap();

        manager.suspend_relationship(&id).unwrap();
        let active = manager.list_active_relationships("a1").unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].member_id, "m2");

        assert!(matches!(
            manager.suspend_relationship(&id).unwrap_err(),
            WorkflowError::InvalidStateTransition { .. }
        ));
        manager.resume_relationship(&id).unwrap();
        assert_eq!(manager.list_active_relationships("a1").unwrap().len(), 2);
    }

    #[test]
    fn test_resume_blocked_by_newer_active_relationship() {
        let (_, manager) = manager();
        let id = manager.ensure_active_relationship("a1", "m1", None, "a1", None).unwrap();
        manager.suspend_relationship(&id).unwrap();
        manager.ensure_active_relationship("a1", "m1", None, "a1", None).unwrap();

        assert!(matches!(
            manager.resume_relationship(&id).unwrap_err(),
            WorkflowError::InvalidStateTransition { .. }
        ));
    }

    #[test]
    fn test_ensure_rejects_blank_ids() {
        let (_, manager) = manager();
        assert!(matches!(
            manager.ensure_active_relationship("", "m1", None, "a1", None).unwrap_err(),
            WorkflowError::InvalidArgument(_)
        ));
    }
}
