use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConsoleError>;

/// One violated argument constraint, rendered as `field: reason`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("Invalid arguments: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("remote API error (status {status}): {message}")]
    Remote { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("authorization error: {0}")]
    Auth(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ConsoleError {
    /// Whether the failure mentions a missing permission, whatever layer
    /// raised it. Such failures trigger the alternate site identifier.
    pub fn is_permission_error(&self) -> bool {
        self.to_string().to_lowercase().contains("permission")
    }
}

impl From<reqwest::Error> for ConsoleError {
    fn from(err: reqwest::Error) -> Self {
        ConsoleError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_joins_every_field() {
        let err = ConsoleError::Validation(vec![
            FieldError::new("rowLimit", "must be between 1 and 25000"),
            FieldError::new("type", "unknown value `audio`"),
        ]);
        assert_eq!(
            err.to_string(),
            "Invalid arguments: rowLimit: must be between 1 and 25000, type: unknown value `audio`"
        );
    }

    #[test]
    fn permission_classification_is_case_insensitive() {
        let err = ConsoleError::Remote {
            status: 403,
            message: "User does not have sufficient PERMISSION for site".into(),
        };
        assert!(err.is_permission_error());

        let quota = ConsoleError::Remote {
            status: 429,
            message: "Quota exceeded".into(),
        };
        assert!(!quota.is_permission_error());
    }

    #[test]
    fn permission_wording_counts_on_any_variant() {
        assert!(ConsoleError::Network("proxy denied: Permission required".into()).is_permission_error());
        assert!(ConsoleError::Store("permission denied for table sites".into()).is_permission_error());
        assert!(!ConsoleError::Network("connection reset".into()).is_permission_error());
    }
}
