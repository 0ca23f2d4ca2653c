use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use collecta_core::store::StoreError;

pub mod memory;
pub mod sql;

pub use memory::InMemoryCollectionsStore;
pub use sql::SqlCollectionsStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("conflicting write: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => Self::Backend(error.to_string()),
            RepositoryError::Decode(message) => Self::Decode(message),
            RepositoryError::NotFound { entity, id } => Self::NotFound { entity, id },
            RepositoryError::Conflict(message) => Self::Conflict(message),
        }
    }
}

pub(crate) fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{field} `{raw}` is not RFC3339: {e}")))
}

pub(crate) fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| RepositoryError::Decode(format!("{field} `{raw}` is not a date: {e}")))
}

#[cfg(test)]
mod tests {
    use collecta_core::store::StoreError;

    use super::{parse_date, parse_timestamp, RepositoryError};

    #[test]
    fn repository_errors_keep_their_class_in_the_store_port() {
        let conflict = StoreError::from(RepositoryError::Conflict("already approved".to_string()));
        assert!(matches!(conflict, StoreError::Conflict(_)));

        let missing = StoreError::from(RepositoryError::NotFound {
            entity: "debt",
            id: "D-9".to_string(),
        });
        assert!(matches!(missing, StoreError::NotFound { entity: "debt", .. }));

        let decode = StoreError::from(RepositoryError::Decode("bad status".to_string()));
        assert!(matches!(decode, StoreError::Decode(_)));
    }

    #[test]
    fn malformed_timestamps_surface_as_decode_errors() {
        assert!(parse_timestamp("requested_at", "2026-03-01T10:00:00Z").is_ok());
        assert!(matches!(
            parse_timestamp("requested_at", "yesterday"),
            Err(RepositoryError::Decode(message)) if message.contains("requested_at")
        ));
        assert!(parse_date("next_follow_up_date", "2026-03-10").is_ok());
        assert!(parse_date("next_follow_up_date", "10/03/2026").is_err());
    }
}
