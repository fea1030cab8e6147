use thiserror::Error;

/// Top-level error type for the furrow system.
///
/// Outcomes that are expected during normal operation (a record with no
/// embeddable text, an embedding that is still pending, a photo whose
/// embedding failed) are not errors; they are reported through the status
/// types in [`crate::types`]. This enum covers the cases a caller must react to.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FurrowError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The configured provider mode requires a credential that is not set.
    #[error("Missing credential: {variable} is not set but provider mode is '{mode}'")]
    MissingCredential { mode: String, variable: String },

    /// No embedding could be produced (dependency missing, load failure, remote failure).
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Empty input")]
    EmptyInput,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl FurrowError {
    /// True for failures a caller may retry later without changing configuration.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FurrowError::ProviderUnavailable(_) | FurrowError::Io(_))
    }
}

impl From<toml::de::Error> for FurrowError {
    fn from(err: toml::de::Error) -> Self {
        FurrowError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for FurrowError {
    fn from(err: toml::ser::Error) -> Self {
        FurrowError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for FurrowError {
    fn from(err: serde_json::Error) -> Self {
        FurrowError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for furrow operations.
pub type Result<T> = std::result::Result<T, FurrowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FurrowError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_missing_credential_display_names_variable_and_mode() {
        let err = FurrowError::MissingCredential {
            mode: "openai".to_string(),
            variable: "OPENAI_API_KEY".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("OPENAI_API_KEY"));
        assert!(msg.contains("'openai'"));
    }

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(FurrowError, &str)> = vec![
            (
                FurrowError::ProviderUnavailable("model missing".to_string()),
                "Embedding provider unavailable: model missing",
            ),
            (FurrowError::EmptyInput, "Empty input"),
            (
                FurrowError::NotFound("visit v1".to_string()),
                "Not found: visit v1",
            ),
            (
                FurrowError::InvalidInput("severity 9".to_string()),
                "Invalid input: severity 9",
            ),
            (
                FurrowError::Storage("disk full".to_string()),
                "Storage error: disk full",
            ),
            (
                FurrowError::Search("index corrupt".to_string()),
                "Search error: index corrupt",
            ),
            (
                FurrowError::Image("bad header".to_string()),
                "Image error: bad header",
            ),
            (
                FurrowError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FurrowError = io_err.into();
        assert!(matches!(err, FurrowError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let err: FurrowError = err.unwrap_err().into();
        assert!(matches!(err, FurrowError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let err: FurrowError = err.unwrap_err().into();
        assert!(matches!(err, FurrowError::Serialization(_)));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(FurrowError::ProviderUnavailable("timeout".into()).is_retryable());
        assert!(!FurrowError::MissingCredential {
            mode: "openai".into(),
            variable: "OPENAI_API_KEY".into()
        }
        .is_retryable());
        assert!(!FurrowError::NotFound("x".into()).is_retryable());
    }
}
