pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod incidents;
pub mod models;
pub mod notifications;
pub mod relationships;
pub mod storage;
pub mod workflow;


// Re-export commonly used types
pub use config::{get_config_path, AttributionConfig, EngineConfig, NotificationsConfig};
pub use engine::Engine;
pub use error::{Result, StoreError, StoreResult, WorkflowError};
pub use incidents::IncidentAttribution;
pub use models::{
    Decision, EntityKind, Incident, IncidentStatus, LedgerSnapshot, ManagedRelationship,
    NewNotification, Notification, NotificationAction, NotificationCategory, RelatedEntity,
    RelationshipStatus, Request, RequestStatus, RequestTransition,
};
pub use notifications::{messages, NotificationDispatcher, NotificationSink, StoreSink};
pub use relationships::RelationshipManager;
pub use storage::Storage;
pub use workflow::{ReconcileReport, RequestWorkflow, Resolution};
