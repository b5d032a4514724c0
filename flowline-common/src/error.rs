//! Common error types for FlowLine
//!
//! One taxonomy for the whole workspace. Workflow and store code return
//! these directly; the HTTP layer maps each variant to a status code via
//! [`Error::status_code`].

use thiserror::Error;
use uuid::Uuid;

/// Common result type for FlowLine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared across the FlowLine crates
#[derive(Error, Debug)]
pub enum Error {
    /// Client-fixable input problem (notes length, rejection reason,
    /// empty measurements, malformed threshold)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Slot already occupied by another active reading, or a stale
    /// version was presented at commit. Carries the colliding reading
    /// id when one is known.
    #[error("Conflict: slot occupied or version mismatch{}", existing.map(|id| format!(" (existing reading {id})")).unwrap_or_default())]
    Conflict {
        /// Id of the reading already occupying the slot, when known
        existing: Option<Uuid>,
    },

    /// Requested transition is not in the lifecycle table
    #[error("Invalid state: cannot {event} a reading in status {current}")]
    InvalidState {
        /// Status the reading is currently in (canonical storage form)
        current: String,
        /// Event that was attempted
        event: String,
    },

    /// Actor lacks the required authority (or violates segregation of duties)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Store collaborator failure that is not a plain database error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the concurrent-submission collision variant
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::Conflict { .. } => 409,
            Error::InvalidState { .. } => 422,
            Error::Storage(_) | Error::Database(_) | Error::Config(_) | Error::Io(_) => 500,
        }
    }

    /// Short machine-readable kind string for API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Conflict { .. } => "conflict",
            Error::InvalidState { .. } => "invalid_state",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::Storage(_) | Error::Database(_) => "storage",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_existing_reading() {
        let id = Uuid::new_v4();
        let err = Error::Conflict { existing: Some(id) };
        assert!(err.to_string().contains(&id.to_string()));
        assert!(err.is_conflict());
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(Error::Validation("x".into()).status_code(), 400);
        assert_eq!(Error::Forbidden("x".into()).status_code(), 403);
        assert_eq!(Error::NotFound("x".into()).status_code(), 404);
        assert_eq!(Error::Conflict { existing: None }.status_code(), 409);
        assert_eq!(
            Error::InvalidState {
                current: "VALIDATED".into(),
                event: "reject".into()
            }
            .status_code(),
            422
        );
        assert_eq!(Error::Storage("x".into()).status_code(), 500);
    }
}
