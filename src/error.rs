/// Error type for the tagmark library
///
/// Storage, serialization and configuration failures convert in through
/// `#[from]`; the remaining variants are the domain outcomes callers are
/// expected to match on (not found, precondition violations, bad queries).
#[derive(Debug, thiserror::Error)]
pub enum TagmarkError {
    /// Database-related errors (SQLite), both the relational store and the index
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors (queue payloads)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing/serialization errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// No record of the given kind with the given id
    #[error("{kind} with ID {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// An operation that needs at least one tag was given none
    #[error("{0} requires at least one tag")]
    EmptyTagList(&'static str),

    /// Tag name failed validation
    #[error("Invalid tag name: {0:?}")]
    InvalidTag(String),

    /// Invalid input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Free-text query could not be parsed
    #[error("Invalid search query: {0}")]
    InvalidQuery(String),

    /// Tag cloud weights are undefined when every retained tag has the same count
    #[error("Tag cloud undefined: all {0} tags have the same usage count")]
    UniformTagCounts(usize),

    /// Caller does not own the record it tried to change
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Queue broker errors
    #[error("Broker error: {0}")]
    Broker(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using TagmarkError
pub type Result<T> = std::result::Result<T, TagmarkError>;

impl TagmarkError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        TagmarkError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// True for the "no such record" outcome, as opposed to an empty filter result
    pub fn is_not_found(&self) -> bool {
        matches!(self, TagmarkError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = TagmarkError::not_found("Bookmark", 42);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Bookmark with ID 42 not found");
    }

    #[test]
    fn test_rusqlite_conversion() {
        let err: TagmarkError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, TagmarkError::Database(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_uniform_counts_is_distinct() {
        let err = TagmarkError::UniformTagCounts(15);
        assert!(matches!(err, TagmarkError::UniformTagCounts(15)));
        assert!(err.to_string().contains("15"));
    }
}
