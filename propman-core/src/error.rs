//! Error types for the store layer and the workflow services

use thiserror::Error;
use uuid::Uuid;

use crate::models::EntityKind;

/// Errors reported by a storage backend
#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write
    #[error("Constraint violated: {0}")]
    Conflict(String),

    /// Any other backend fault (I/O, SQL, parse, lock timeout)
    #[error("Store unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors returned by the request, relationship, notification and incident services
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("A pending request from {requester_id} to {target_id} already exists")]
    DuplicatePendingRequest {
        requester_id: String,
        target_id: String,
    },

    #[error("Cannot {attempted} {kind} {id}: it is {current}")]
    InvalidStateTransition {
        kind: EntityKind,
        id: Uuid,
        current: String,
        attempted: &'static str,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: Uuid },

    #[error("Failed to create relationship between {administrator_id} and {member_id}")]
    RelationshipCreateFailed {
        administrator_id: String,
        member_id: String,
        #[source]
        source: Box<WorkflowError>,
    },

    #[error("Failed to deliver notification to {recipient_id}")]
    NotificationDeliveryFailed {
        recipient_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
}

impl WorkflowError {
    /// Precondition failures caused by the caller, as opposed to system faults
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            WorkflowError::DuplicatePendingRequest { .. }
                | WorkflowError::InvalidStateTransition { .. }
                | WorkflowError::NotFound { .. }
                | WorkflowError::InvalidArgument(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::StoreUnavailable(_))
    }

    /// Text suitable for showing to the actor who made the call
    pub fn user_message(&self) -> String {
        match self {
            WorkflowError::DuplicatePendingRequest { .. } => {
                "You already have a pending request with this administrator.".to_string()
            }
            WorkflowError::InvalidStateTransition {
                kind: EntityKind::Request,
                ..
            } => "This request has already been answered or withdrawn.".to_string(),
            WorkflowError::InvalidStateTransition { current, .. } => {
                format!("This relationship is {} and cannot be changed that way.", current)
            }
            WorkflowError::NotFound { kind, .. } => {
                format!("The {} could not be found.", kind.as_str().replace('_', " "))
            }
            WorkflowError::InvalidArgument(message) => message.clone(),
            WorkflowError::RelationshipCreateFailed { .. }
            | WorkflowError::NotificationDeliveryFailed { .. }
            | WorkflowError::StoreUnavailable(_) => {
                "Something went wrong on our side. Please try again.".to_string()
            }
        }
    }

    pub(crate) fn not_found(kind: EntityKind, id: Uuid) -> Self {
        WorkflowError::NotFound { kind, id }
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Rejects empty or whitespace-only actor ids
pub(crate) fn require_actor(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(WorkflowError::InvalidArgument(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_failures_are_user_errors() {
        let dup = WorkflowError::DuplicatePendingRequest {
            requester_id: "m1".into(),
            target_id: "a1".into(),
        };
        assert!(dup.is_user_error());
        assert!(!dup.is_retryable());
        assert!(dup.user_message().contains("pending request"));

        let store = WorkflowError::from(StoreError::Unavailable(anyhow::anyhow!("disk gone")));
        assert!(!store.is_user_error());
        assert!(store.is_retryable());
        assert!(store.user_message().contains("try again"));
    }

    #[test]
    fn test_require_actor_rejects_blank() {
        assert!(require_actor("recipient_id", "  ").is_err());
        assert!(require_actor("recipient_id", "m1").is_ok());
    }
}
