use thiserror::Error;

use crate::chain::ChainTransitionError;
use crate::domain::action::ActionStatus;
use crate::routing::RoutingError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid action transition from {from:?} to {to:?}")]
    InvalidActionTransition { from: ActionStatus, to: ActionStatus },
    #[error(transparent)]
    ChainTransition(#[from] ChainTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("missing required field `{field}`")]
    Validation { field: String },
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("actor `{actor}` is not authorized: {detail}")]
    Authorization { actor: String, detail: String },
    #[error("{entity} was modified concurrently: {key}")]
    Conflict { entity: &'static str, key: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
    /// A downstream effect failed after the primary mutation succeeded.
    /// Logged, never used to mask the primary result.
    #[error("secondary effect `{phase}` failed: {detail}")]
    SecondaryEffect { phase: &'static str, detail: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Forbidden { .. } => "You are not allowed to perform this operation.",
            Self::Conflict { .. } => {
                "The record changed while you were editing it. Reload and retry."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(_)
            | ApplicationError::Routing(_)
            | ApplicationError::Validation { .. } => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: unassigned,
            },
            ApplicationError::NotFound { entity, key } => Self::NotFound {
                message: format!("{entity} `{key}` not found"),
                correlation_id: unassigned,
            },
            ApplicationError::Authorization { detail, .. } => {
                Self::Forbidden { message: detail, correlation_id: unassigned }
            }
            ApplicationError::Conflict { entity, key } => Self::Conflict {
                message: format!("{entity} `{key}` was concurrently modified"),
                correlation_id: unassigned,
            },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned }
            }
            ApplicationError::SecondaryEffect { phase, detail } => Self::Internal {
                message: format!("secondary effect `{phase}` failed: {detail}"),
                correlation_id: unassigned,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn domain_error_maps_to_bad_request_with_correlation_id() {
        let interface = ApplicationError::from(DomainError::InvariantViolation(
            "remarks must not shrink".to_owned(),
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, .. } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn authorization_error_maps_to_forbidden() {
        let interface = ApplicationError::Authorization {
            actor: "u-intruder".to_owned(),
            detail: "only the current assignee may update this action".to_owned(),
        }
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Forbidden { .. }));
        assert_eq!(interface.user_message(), "You are not allowed to perform this operation.");
    }

    #[test]
    fn conflict_maps_to_conflict_with_user_safe_message() {
        let interface = ApplicationError::Conflict { entity: "action", key: "ACT-7".to_owned() }
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(
            interface.user_message(),
            "The record changed while you were editing it. Reload and retry."
        );
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface =
            ApplicationError::Persistence("database lock timeout".to_owned()).into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "req-4");
    }
}
