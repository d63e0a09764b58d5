use thiserror::Error;

pub type Result<T> = std::result::Result<T, SuperSaveError>;

/// Errors surfaced by the store.
///
/// Configuration and schema variants fail fast during setup; data and
/// query variants occur per-operation. Driver errors propagate unwrapped
/// inside [`SuperSaveError::Database`].
#[derive(Debug, Error)]
pub enum SuperSaveError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("schema error: {0}")]
    Schema(String),

    /// Filter/sort field names become JSON paths and column DDL, so they
    /// are restricted to a safe identifier subset.
    #[error("invalid field name '{0}': must match ^[A-Za-z_][A-Za-z0-9_]*$")]
    InvalidFieldName(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Sentinel error thrown by collection hooks.
///
/// Carries an optional HTTP status; the attached router maps a missing
/// status to 500 and forwards the message verbatim.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HookError {
    pub message: String,
    pub status_code: Option<u16>,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status_code: u16) -> Self {
        Self {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// The effective HTTP status at the boundary.
    pub fn status_or_default(&self) -> u16 {
        self.status_code.unwrap_or(500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_error_status_default() {
        assert_eq!(HookError::new("boom").status_or_default(), 500);
        assert_eq!(
            HookError::with_status("unauthorized", 401).status_or_default(),
            401
        );
    }

    #[test]
    fn test_hook_error_message_forwarded() {
        let err = HookError::with_status("Test", 401);
        assert_eq!(err.to_string(), "Test");
    }
}
