//! Administrator request workflow
//!
//! A request starts `pending` and moves exactly once to `accepted`, `rejected`
//! or `cancelled`. The request row is authoritative: relationship creation and
//! notifications happen after it commits, and their failures are logged and
//! reported on the [`Resolution`] without undoing the transition.
//! [`RequestWorkflow::reconcile_accepted_requests`] repairs accepted requests
//! whose relationship was never materialized.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{DatabaseBackend, RelationshipFilter, RequestFilter};
use crate::error::{require_actor, Result, WorkflowError};
use crate::models::{Decision, EntityKind, Request, RequestStatus, RequestTransition};
use crate::notifications::{messages, NotificationDispatcher};
use crate::relationships::RelationshipManager;

/// Outcome of answering a request
#[derive(Debug)]
pub struct Resolution {
    /// The request in its new terminal state
    pub request: Request,
    /// Set when the request was accepted and the relationship exists
    pub relationship_id: Option<Uuid>,
    /// Set when the requester's notification was delivered
    pub notification_id: Option<Uuid>,
    /// Best-effort side effects that failed after the request committed
    pub side_effect_failures: Vec<WorkflowError>,
}

impl Resolution {
    pub fn notified(&self) -> bool {
        self.notification_id.is_some()
    }
}

/// Summary of a reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// (administrator, member) pairs with an accepted request
    pub examined: usize,
    /// Pairs whose missing relationship was created
    pub repaired: usize,
    /// Pairs still missing a relationship after this pass
    pub failed: usize,
}

#[derive(Clone)]
pub struct RequestWorkflow {
    db: Arc<dyn DatabaseBackend>,
    relationships: RelationshipManager,
    notifier: NotificationDispatcher,
    action_base_path: String,
}

fn clean_text(text: Option<&str>) -> Option<String> {
    text.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string)
}

fn invalid_transition(request: &Request, attempted: &'static str) -> WorkflowError {
    WorkflowError::InvalidStateTransition {
        kind: EntityKind::Request,
        id: request.id,
        current: request.status.to_string(),
        attempted,
    }
}

impl RequestWorkflow {
    pub fn new(
        db: Arc<dyn DatabaseBackend>,
        relationships: RelationshipManager,
        notifier: NotificationDispatcher,
        action_base_path: impl Into<String>,
    ) -> Self {
        Self {
            db,
            relationships,
            notifier,
            action_base_path: action_base_path.into(),
        }
    }

    /// Creates a pending request from a member to an administrator and
    /// notifies the administrator.
    pub fn submit_request(
        &self,
        requester_id: &str,
        target_id: &str,
        community_id: Option<&str>,
        message: Option<&str>,
    ) -> Result<Request> {
        require_actor("requester_id", requester_id)?;
        require_actor("target_id", target_id)?;
        if requester_id == target_id {
            return Err(WorkflowError::InvalidArgument(
                "A request cannot be sent to yourself".to_string(),
            ));
        }

        let duplicate = || WorkflowError::DuplicatePendingRequest {
            requester_id: requester_id.to_string(),
            target_id: target_id.to_string(),
        };

        if self.pending_request_between(requester_id, target_id)?.is_some() {
            return Err(duplicate());
        }

        let request = Request::new(requester_id, target_id)
            .with_community(clean_text(community_id))
            .with_message(clean_text(message));

        // The store's uniqueness constraint closes the check-then-insert race
        match self.db.insert_request(&request) {
            Ok(()) => {}
            Err(err) if err.is_conflict() => return Err(duplicate()),
            Err(err) => return Err(err.into()),
        }
        info!(request_id = %request.id, requester_id, target_id, "request submitted");

        if let Err(err) = self
            .notifier
            .notify(messages::request_created(&request, &self.action_base_path))
        {
            warn!(
                request_id = %request.id,
                recipient_id = target_id,
                error = ?err,
                "new-request notification not delivered"
            );
        }

        Ok(request)
    }

    /// Accepts or rejects a pending request.
    ///
    /// On acceptance the managed relationship is ensured for
    /// (target, requester). Either way the requester is notified.
    pub fn resolve_request(
        &self,
        request_id: &Uuid,
        decision: Decision,
        responder_id: &str,
        response_message: Option<&str>,
    ) -> Result<Resolution> {
        require_actor("responder_id", responder_id)?;

        let mut request = self.get_request(request_id)?;
        if !request.is_pending() {
            return Err(invalid_transition(&request, "resolve"));
        }

        let transition = RequestTransition::resolve(decision, responder_id, clean_text(response_message));
        if self.db.transition_request(request_id, &transition)? == 0 {
            // Someone else terminalized it after our read
            let current = self.get_request(request_id)?;
            return Err(invalid_transition(&current, "resolve"));
        }
        transition.apply_to(&mut request);
        info!(
            request_id = %request.id,
            status = %request.status,
            responder_id,
            "request resolved"
        );

        let mut side_effect_failures = Vec::new();

        let relationship_id = if decision == Decision::Accepted {
            let notes = format!("Established from request {}", request.id);
            match self.relationships.ensure_active_relationship(
                &request.target_id,
                &request.requester_id,
                request.community_id.as_deref(),
                responder_id,
                Some(&notes),
            ) {
                Ok(id) => Some(id),
                Err(source) => {
                    let err = WorkflowError::RelationshipCreateFailed {
                        administrator_id: request.target_id.clone(),
                        member_id: request.requester_id.clone(),
                        source: Box::new(source),
                    };
                    warn!(
                        request_id = %request.id,
                        error = ?err,
                        "relationship not created for accepted request; reconciliation will retry"
                    );
                    side_effect_failures.push(err);
                    None
                }
            }
        } else {
            None
        };

        let notification_id = match self
            .notifier
            .notify(messages::request_resolved(&request, &self.action_base_path))
        {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(
                    request_id = %request.id,
                    recipient_id = %request.requester_id,
                    error = ?err,
                    "request-resolved notification not delivered"
                );
                side_effect_failures.push(err);
                None
            }
        };

        Ok(Resolution {
            request,
            relationship_id,
            notification_id,
            side_effect_failures,
        })
    }

    /// Withdraws a pending request. No relationship or notification results.
    pub fn cancel_request(&self, request_id: &Uuid) -> Result<Request> {
        let mut request = self.get_request(request_id)?;
        if !request.is_pending() {
            return Err(invalid_transition(&request, "cancel"));
        }

        let transition = RequestTransition::cancel();
        if self.db.transition_request(request_id, &transition)? == 0 {
            let current = self.get_request(request_id)?;
            return Err(invalid_transition(&current, "cancel"));
        }
        transition.apply_to(&mut request);
        info!(request_id = %request.id, "request cancelled");

        Ok(request)
    }

    pub fn get_request(&self, request_id: &Uuid) -> Result<Request> {
        self.db
            .get_request(request_id)?
            .ok_or_else(|| WorkflowError::not_found(EntityKind::Request, *request_id))
    }

    pub fn pending_request_between(&self, requester_id: &str, target_id: &str) -> Result<Option<Request>> {
        let filter = RequestFilter::new()
            .requester(requester_id)
            .target(target_id)
            .status(RequestStatus::Pending);
        Ok(self.db.list_requests(&filter)?.into_iter().next())
    }

    /// Requests a member has sent, newest first
    pub fn list_outgoing_requests(&self, requester_id: &str, status: Option<RequestStatus>) -> Result<Vec<Request>> {
        let mut filter = RequestFilter::new().requester(requester_id);
        filter.status = status;
        let mut requests = self.db.list_requests(&filter)?;
        requests.reverse();
        Ok(requests)
    }

    /// Requests an administrator has received, newest first
    pub fn list_incoming_requests(&self, target_id: &str, status: Option<RequestStatus>) -> Result<Vec<Request>> {
        let mut filter = RequestFilter::new().target(target_id);
        filter.status = status;
        let mut requests = self.db.list_requests(&filter)?;
        requests.reverse();
        Ok(requests)
    }

    /// Creates the missing relationship for every pair whose latest accepted
    /// request has no relationship that was in place at or after the acceptance.
    ///
    /// Relationships terminated after the acceptance count as in place, so a
    /// deliberate termination is never undone. Safe to run repeatedly.
    pub fn reconcile_accepted_requests(&self) -> Result<ReconcileReport> {
        let accepted = self
            .db
            .list_requests(&RequestFilter::new().status(RequestStatus::Accepted))?;

        let mut latest: BTreeMap<(String, String), Request> = BTreeMap::new();
        for request in accepted {
            let key = (request.target_id.clone(), request.requester_id.clone());
            let newer = latest
                .get(&key)
                .map_or(true, |seen| request.responded_at >= seen.responded_at);
            if newer {
                latest.insert(key, request);
            }
        }

        let mut report = ReconcileReport::default();
        for ((administrator_id, member_id), request) in latest {
            report.examined += 1;
            let accepted_at = request.responded_at.unwrap_or(request.requested_at);

            let filter = RelationshipFilter::new()
                .administrator(&administrator_id)
                .member(&member_id);
            let covered = self
                .db
                .list_relationships(&filter)?
                .iter()
                .any(|r| r.covers(accepted_at));
            if covered {
                continue;
            }

            let established_by = request.responder_id.as_deref().unwrap_or(&administrator_id);
            let notes = format!("Restored from accepted request {}", request.id);
            match self.relationships.ensure_active_relationship(
                &administrator_id,
                &member_id,
                request.community_id.as_deref(),
                established_by,
                Some(&notes),
            ) {
                Ok(relationship_id) => {
                    report.repaired += 1;
                    info!(
                        request_id = %request.id,
                        %relationship_id,
                        "relationship restored by reconciliation"
                    );
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(request_id = %request.id, error = ?err, "reconciliation could not restore relationship");
                }
            }
        }

        info!(
            examined = report.examined,
            repaired = report.repaired,
            failed = report.failed,
            "reconciliation finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Mutation, NotificationFilter, SqliteBackend};
    use crate::error::{StoreError, StoreResult};
    use crate::models::{LedgerSnapshot, ManagedRelationship, NotificationCategory, RelationshipStatus};
    use crate::notifications::NotificationSink;

    fn workflow_with(db: Arc<dyn DatabaseBackend>, notifier: NotificationDispatcher) -> RequestWorkflow {
        let relationships = RelationshipManager::new(Arc::clone(&db), notifier.clone());
        RequestWorkflow::new(db, relationships, notifier, "/requests")
    }

    fn workflow() -> (Arc<dyn DatabaseBackend>, RequestWorkflow) {
        let db: Arc<dyn DatabaseBackend> = Arc::new(SqliteBackend::in_memory().unwrap());
        let notifier = NotificationDispatcher::new(Arc::clone(&db));
        (Arc::clone(&db), workflow_with(db, notifier))
    }

    struct OfflineSink;

    impl NotificationSink for OfflineSink {
        fn deliver(&self, _notification: &crate::models::Notification) -> anyhow::Result<()> {
            anyhow::bail!("notification service offline")
        }
    }

    /// Store whose relationship table rejects every insert
    struct RelationshipOutage {
        inner: Arc<dyn DatabaseBackend>,
    }

    impl DatabaseBackend for RelationshipOutage {
        fn backend_type(&self) -> crate::db::BackendType {
            self.inner.backend_type()
        }

        fn path(&self) -> &std::path::Path {
            self.inner.path()
        }

        fn load(&self) -> StoreResult<LedgerSnapshot> {
            self.inner.load()
        }

        fn save(&self, snapshot: &LedgerSnapshot) -> StoreResult<()> {
            self.inner.save(snapshot)
        }

        fn apply(&self, mutation: &mut Mutation<'_>) -> StoreResult<usize> {
            self.inner.apply(mutation)
        }

        fn insert_request(&self, request: &Request) -> StoreResult<()> {
            self.inner.insert_request(request)
        }

        fn get_request(&self, id: &Uuid) -> StoreResult<Option<Request>> {
            self.inner.get_request(id)
        }

        fn transition_request(&self, id: &Uuid, transition: &RequestTransition) -> StoreResult<usize> {
            self.inner.transition_request(id, transition)
        }

        fn list_relationships(&self, filter: &RelationshipFilter) -> StoreResult<Vec<ManagedRelationship>> {
            self.inner.list_relationships(filter)
        }

        fn insert_relationship(&self, _relationship: &ManagedRelationship) -> StoreResult<()> {
            Err(StoreError::Unavailable(anyhow::anyhow!("relationships table offline")))
        }

        fn insert_notification(&self, notification: &crate::models::Notification) -> StoreResult<()> {
            self.inner.insert_notification(notification)
        }
    }

    #[test]
    fn test_submit_notifies_target() {
        let (db, workflow) = workflow();
        let request = workflow
            .submit_request("m1", "a1", Some("c1"), Some("  please  "))
            .unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.request_message.as_deref(), Some("please"));

        let inbox = db.list_notifications(&NotificationFilter::recipient("a1")).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].category, NotificationCategory::AdminRequest);
        assert_eq!(inbox[0].related.as_ref().unwrap().id, request.id);
    }

    #[test]
    fn test_submit_to_self_is_rejected() {
        let (_, workflow) = workflow();
        assert!(matches!(
            workflow.submit_request("m1", "m1", None, None).unwrap_err(),
            WorkflowError::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_notification_failure_does_not_fail_submit_or_resolve() {
        let db: Arc<dyn DatabaseBackend> = Arc::new(SqliteBackend::in_memory().unwrap());
        let notifier = NotificationDispatcher::with_sink(Arc::clone(&db), Arc::new(OfflineSink));
        let workflow = workflow_with(Arc::clone(&db), notifier);

        let request = workflow.submit_request("m1", "a1", None, None).unwrap();
        assert!(db.get_request(&request.id).unwrap().is_some());

        let resolution = workflow
            .resolve_request(&request.id, Decision::Accepted, "a1", None)
            .unwrap();
        assert_eq!(resolution.request.status, RequestStatus::Accepted);
        assert!(resolution.relationship_id.is_some());
        assert!(!resolution.notified());
        assert!(matches!(
            resolution.side_effect_failures.as_slice(),
            [WorkflowError::NotificationDeliveryFailed { .. }]
        ));
    }

    #[test]
    fn test_accept_survives_relationship_store_failure_and_reconcile_repairs_it() {
        let healthy: Arc<dyn DatabaseBackend> = Arc::new(SqliteBackend::in_memory().unwrap());
        let degraded: Arc<dyn DatabaseBackend> = Arc::new(RelationshipOutage {
            inner: Arc::clone(&healthy),
        });
        let notifier = NotificationDispatcher::new(Arc::clone(&healthy));
        let workflow = workflow_with(degraded, notifier);

        let request = workflow.submit_request("m1", "a1", None, None).unwrap();
        let resolution = workflow
            .resolve_request(&request.id, Decision::Accepted, "a1", None)
            .unwrap();

        assert_eq!(resolution.request.status, RequestStatus::Accepted);
        assert_eq!(
            healthy.get_request(&request.id).unwrap().unwrap().status,
            RequestStatus::Accepted
        );
        assert!(resolution.relationship_id.is_none());
        match resolution.side_effect_failures.as_slice() {
            [WorkflowError::RelationshipCreateFailed {
                administrator_id,
                member_id,
                ..
            }] => {
                assert_eq!(administrator_id, "a1");
                assert_eq!(member_id, "m1");
            }
            other => panic!("unexpected side effect failures: {:?}", other),
        }

        assert!(resolution.notified());
        let inbox = healthy.list_notifications(&NotificationFilter::recipient("m1")).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].category, NotificationCategory::RequestAccepted);
        assert!(healthy.list_relationships(&RelationshipFilter::new()).unwrap().is_empty());

        let recovered = workflow_with(Arc::clone(&healthy), NotificationDispatcher::new(Arc::clone(&healthy)));
        let report = recovered.reconcile_accepted_requests().unwrap();
        assert_eq!(report.repaired, 1);
        assert_eq!(report.failed, 0);
        let active = healthy
            .list_relationships(&RelationshipFilter::new().status(RelationshipStatus::Active))
            .unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].is_between("a1", "m1"));
    }

    #[test]
    fn test_resolve_terminal_request_fails_without_touching_responder() {
        let (db, workflow) = workflow();
        let request = workflow.submit_request("m1", "a1", None, None).unwrap();
        workflow
            .resolve_request(&request.id, Decision::Rejected, "a1", Some("no capacity"))
            .unwrap();

        let err = workflow
            .resolve_request(&request.id, Decision::Accepted, "a2", Some("changed my mind"))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidStateTransition { .. }));

        let stored = db.get_request(&request.id).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Rejected);
        assert_eq!(stored.responder_id.as_deref(), Some("a1"));
        assert_eq!(stored.response_message.as_deref(), Some("no capacity"));
        assert!(db.list_relationships(&RelationshipFilter::new()).unwrap().is_empty());
    }

    #[test]
    fn test_cancel_twice_fails_cleanly() {
        let (db, workflow) = workflow();
        let request = workflow.submit_request("m1", "a1", None, None).unwrap();
        let cancelled = workflow.cancel_request(&request.id).unwrap();
        assert_eq!(cancelled.status, RequestStatus::Cancelled);

        assert!(matches!(
            workflow.cancel_request(&request.id).unwrap_err(),
            WorkflowError::InvalidStateTransition { .. }
        ));
        // Only the submission notification exists
        assert_eq!(db.list_notifications(&NotificationFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_resolve_unknown_request_is_not_found() {
        let (_, workflow) = workflow();
        assert!(matches!(
            workflow
                .resolve_request(&Uuid::new_v4(), Decision::Accepted, "a1", None)
                .unwrap_err(),
            WorkflowError::NotFound { kind: EntityKind::Request, .. }
        ));
    }

    #[test]
    fn test_resubmit_allowed_after_resolution() {
        let (_, workflow) = workflow();
        let first = workflow.submit_request("m1", "a1", None, None).unwrap();
        workflow
            .resolve_request(&first.id, Decision::Rejected, "a1", None)
            .unwrap();
        let second = workflow.submit_request("m1", "a1", None, None).unwrap();

        let outgoing = workflow.list_outgoing_requests("m1", None).unwrap();
        assert_eq!(outgoing.len(), 2);
        assert_eq!(
            workflow.pending_request_between("m1", "a1").unwrap().map(|r| r.id),
            Some(second.id)
        );
        assert_eq!(
            workflow
                .list_incoming_requests("a1", Some(RequestStatus::Rejected))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_reconcile_restores_missing_relationship() {
        let (db, workflow) = workflow();
        let request = workflow.submit_request("m1", "a1", None, None).unwrap();

        // Simulate an acceptance whose relationship insert never happened
        let transition = RequestTransition::resolve(Decision::Accepted, "a1", None);
        assert_eq!(db.transition_request(&request.id, &transition).unwrap(), 1);

        let report = workflow.reconcile_accepted_requests().unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                examined: 1,
                repaired: 1,
                failed: 0
            }
        );
        let active = db
            .list_relationships(&RelationshipFilter::new().status(RelationshipStatus::Active))
            .unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].is_between("a1", "m1"));

        let again = workflow.reconcile_accepted_requests().unwrap();
        assert_eq!(again.repaired, 0);
        assert_eq!(
            db.list_relationships(&RelationshipFilter::new()).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_reconcile_does_not_resurrect_terminated_relationship() {
        let (db, workflow) = workflow();
        let request = workflow.submit_request("m1", "a1", None, None).unwrap();
        let resolution = workflow
            .resolve_request(&request.id, Decision::Accepted, "a1", None)
            .unwrap();
        let relationship_id = resolution.relationship_id.unwrap();

        let relationships = RelationshipManager::new(Arc::clone(&db), NotificationDispatcher::new(Arc::clone(&db)));
        relationships
            .terminate_relationship(&relationship_id, Some("moved away"))
            .unwrap();

        let report = workflow.reconcile_accepted_requests().unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.repaired, 0);
        assert!(relationships.list_active_relationships("a1").unwrap().is_empty());
    }

    #[test]
    fn test_reconcile_ignores_relationship_that_predates_acceptance_and_ended_before_it() {
        let (db, workflow) = workflow();

        let mut old = ManagedRelationship::new("a1", "m1", "a1");
        old.status = RelationshipStatus::Inactive;
        old.ended_at = Some(old.established_at);
        db.insert_relationship(&old).unwrap();

        let request = workflow.submit_request("m1", "a1", None, None).unwrap();
        let transition = RequestTransition::resolve(Decision::Accepted, "a1", None);
        db.transition_request(&request.id, &transition).unwrap();

        let report = workflow.reconcile_accepted_requests().unwrap();
        assert_eq!(report.repaired, 1);
    }
}
