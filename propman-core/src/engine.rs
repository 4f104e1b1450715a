//! Wiring of the four services over one store

use anyhow::Result;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::db::DatabaseBackend;
use crate::incidents::IncidentAttribution;
use crate::notifications::{NotificationDispatcher, NotificationSink};
use crate::relationships::RelationshipManager;
use crate::workflow::RequestWorkflow;

/// The request workflow, relationship manager, notification dispatcher and
/// incident attribution, sharing one backend
#[derive(Clone)]
pub struct Engine {
    db: Arc<dyn DatabaseBackend>,
    requests: RequestWorkflow,
    relationships: RelationshipManager,
    notifications: NotificationDispatcher,
    incidents: IncidentAttribution,
}

impl Engine {
    pub fn new(db: Arc<dyn DatabaseBackend>, config: &EngineConfig) -> Self {
        let notifications = NotificationDispatcher::new(Arc::clone(&db));
        Self::assemble(db, notifications, config)
    }

    /// Engine whose notifications go to `sink` instead of the store
    pub fn with_sink(db: Arc<dyn DatabaseBackend>, sink: Arc<dyn NotificationSink>, config: &EngineConfig) -> Self {
        let notifications = NotificationDispatcher::with_sink(Arc::clone(&db), sink);
        Self::assemble(db, notifications, config)
    }

    /// Opens the backend named in `config`
    pub fn open(config: &EngineConfig) -> Result<Self> {
        Ok(Self::new(config.open_backend()?, config))
    }

    fn assemble(db: Arc<dyn DatabaseBackend>, notifications: NotificationDispatcher, config: &EngineConfig) -> Self {
        let relationships = RelationshipManager::new(Arc::clone(&db), notifications.clone());
        let requests = RequestWorkflow::new(
            Arc::clone(&db),
            relationships.clone(),
            notifications.clone(),
            config.notifications.action_base_path.clone(),
        );
        let incidents = IncidentAttribution::new(
            Arc::clone(&db),
            relationships.clone(),
            config.attribution.claim_on_list,
        );

        Self {
            db,
            requests,
            relationships,
            notifications,
            incidents,
        }
    }

    pub fn requests(&self) -> &RequestWorkflow {
        &self.requests
    }

    pub fn relationships(&self) -> &RelationshipManager {
        &self.relationships
    }

    pub fn notifications(&self) -> &NotificationDispatcher {
        &self.notifications
    }

    pub fn incidents(&self) -> &IncidentAttribution {
        &self.incidents
    }

    pub fn backend(&self) -> &Arc<dyn DatabaseBackend> {
        &self.db
    }
}
