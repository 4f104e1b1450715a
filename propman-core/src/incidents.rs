//! Incident attribution
//!
//! Unassigned incidents reported by members under an administrator's active
//! management are claimed for that administrator. The claim is a conditional
//! write restricted to rows that are still unassigned, so concurrent passes
//! claim each incident exactly once and an assigned incident is never moved.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{DatabaseBackend, IncidentFilter};
use crate::error::{require_actor, Result, WorkflowError};
use crate::models::{EntityKind, Incident};
use crate::relationships::RelationshipManager;

#[derive(Clone)]
pub struct IncidentAttribution {
    db: Arc<dyn DatabaseBackend>,
    relationships: RelationshipManager,
    claim_on_list: bool,
}

impl IncidentAttribution {
    pub fn new(db: Arc<dyn DatabaseBackend>, relationships: RelationshipManager, claim_on_list: bool) -> Self {
        Self {
            db,
            relationships,
            claim_on_list,
        }
    }

    /// Records a new incident for `reporter_id`. Used by the reporting side
    /// and the CLI; attribution happens on the next claim pass.
    pub fn report_incident(&self, reporter_id: &str, title: &str) -> Result<Incident> {
        require_actor("reporter_id", reporter_id)?;
        let title = title.trim();
        if title.is_empty() {
            return Err(WorkflowError::InvalidArgument("title must not be empty".to_string()));
        }

        let incident = Incident::new(reporter_id, title);
        self.db.insert_incident(&incident)?;
        info!(incident_id = %incident.id, reporter_id, "incident reported");
        Ok(incident)
    }

    pub fn get_incident(&self, incident_id: &Uuid) -> Result<Incident> {
        self.db
            .get_incident(incident_id)?
            .ok_or_else(|| WorkflowError::not_found(EntityKind::Incident, *incident_id))
    }

    /// Claims every unassigned incident reported by a member the administrator
    /// actively manages. Returns how many incidents this call claimed.
    pub fn claim_unassigned_incidents(&self, administrator_id: &str) -> Result<usize> {
        let candidates = self.unclaimed_incidents_for(administrator_id)?;
        if candidates.is_empty() {
            debug!(administrator_id, "no unclaimed incidents");
            return Ok(0);
        }

        let ids: Vec<Uuid> = candidates.iter().map(|i| i.id).collect();
        let claimed = self.db.claim_incidents(administrator_id, &ids, Utc::now())?;
        info!(
            administrator_id,
            candidates = ids.len(),
            claimed,
            "incidents claimed"
        );
        Ok(claimed)
    }

    /// What a claim pass would take right now, oldest first. Read only.
    pub fn unclaimed_incidents_for(&self, administrator_id: &str) -> Result<Vec<Incident>> {
        require_actor("administrator_id", administrator_id)?;

        let members: BTreeSet<String> = self
            .relationships
            .list_active_relationships(administrator_id)?
            .into_iter()
            .map(|r| r.member_id)
            .collect();
        if members.is_empty() {
            return Ok(Vec::new());
        }

        let filter = IncidentFilter::new().reporters(members).unassigned();
        Ok(self.db.list_incidents(&filter)?)
    }

    /// Incidents assigned to the administrator, newest first.
    ///
    /// With `claim_on_list` set, a claim pass runs first; its failure is
    /// logged and the listing still returns what is already assigned.
    pub fn incidents_for_administrator(&self, administrator_id: &str) -> Result<Vec<Incident>> {
        require_actor("administrator_id", administrator_id)?;

        if self.claim_on_list {
            if let Err(err) = self.claim_unassigned_incidents(administrator_id) {
                warn!(administrator_id, error = ?err, "claim pass before listing failed");
            }
        }

        let mut incidents = self
            .db
            .list_incidents(&IncidentFilter::new().assigned_to(administrator_id))?;
        incidents.reverse();
        Ok(incidents)
    }
}
