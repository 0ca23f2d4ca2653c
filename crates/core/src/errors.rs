use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// A single rejected input field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

fn describe_fields(fields: &[FieldError]) -> String {
    fields.iter().map(|f| format!("{}: {}", f.field, f.message)).collect::<Vec<_>>().join("; ")
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {}", describe_fields(.fields))]
    Validation { fields: Vec<FieldError> },
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { fields: vec![FieldError::new(field, message)] }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound { entity, id } => Self::Domain(DomainError::NotFound { entity, id }),
            StoreError::Conflict(message) => Self::Domain(DomainError::Conflict(message)),
            StoreError::Backend(message) | StoreError::Decode(message) => {
                Self::Persistence(message)
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, fields: Vec<FieldError>, correlation_id: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
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
            Self::Unauthorized { .. } => "The caller could not be identified.",
            Self::Forbidden { .. } => "The caller's role does not allow this operation.",
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => {
                "The record changed in the meantime. Reload it before submitting again."
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
            | Self::Unauthorized { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
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
            | InterfaceError::Unauthorized { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::Validation { fields }) => Self::BadRequest {
                message: describe_fields(&fields),
                fields,
                correlation_id,
            },
            ApplicationError::Domain(DomainError::InvariantViolation(message)) => {
                Self::BadRequest { message, fields: Vec::new(), correlation_id }
            }
            ApplicationError::Domain(error @ DomainError::NotFound { .. }) => {
                Self::NotFound { message: error.to_string(), correlation_id }
            }
            ApplicationError::Domain(DomainError::Conflict(message)) => {
                Self::Conflict { message, correlation_id }
            }
            ApplicationError::Domain(DomainError::Forbidden(message)) => {
                Self::Forbidden { message, correlation_id }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError, FieldError, InterfaceError};
    use crate::store::StoreError;

    #[test]
    fn validation_error_maps_to_bad_request_with_fields() {
        let interface = ApplicationError::from(DomainError::Validation {
            fields: vec![
                FieldError::new("debtIds", "at least one debt is required"),
                FieldError::new("nextFollowUpDate", "must not be in the past"),
            ],
        })
        .into_interface("req-1");

        match interface {
            InterfaceError::BadRequest { ref fields, ref correlation_id, .. } => {
                assert_eq!(correlation_id, "req-1");
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].field, "debtIds");
            }
            other => panic!("expected bad request, got {other:?}"),
        }
    }

    #[test]
    fn bad_request_has_user_safe_message() {
        let interface =
            ApplicationError::from(DomainError::field("observation", "must not be blank"))
                .into_interface("req-2");

        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn store_conflict_surfaces_as_interface_conflict() {
        let interface = ApplicationError::from(StoreError::Conflict(
            "authorization request `AUTH-1` is already approved".to_owned(),
        ))
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(interface.correlation_id(), "req-3");
    }

    #[test]
    fn store_not_found_surfaces_as_interface_not_found() {
        let interface = ApplicationError::from(StoreError::NotFound {
            entity: "authorization request",
            id: "AUTH-404".to_owned(),
        })
        .into_interface("req-4");

        match interface {
            InterfaceError::NotFound { message, .. } => assert!(message.contains("AUTH-404")),
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface =
            ApplicationError::Persistence("database lock timeout".to_owned()).into_interface("req-5");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn forbidden_and_configuration_errors_keep_their_class() {
        let forbidden = ApplicationError::from(DomainError::Forbidden("collector".to_owned()))
            .into_interface("req-6");
        assert!(matches!(forbidden, InterfaceError::Forbidden { .. }));

        let internal =
            ApplicationError::Configuration("bad thresholds".to_owned()).into_interface("req-7");
        assert_eq!(internal.user_message(), "An unexpected internal error occurred.");
    }
}
