use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckError {
    /// Fetching or parsing the configuration document failed.
    #[error("config error: {0}")]
    Config(String),

    /// A remote cloud API call failed. `code` carries the service error
    /// code when the service reported one.
    #[error("cloud api error ({}): {message}", .code.as_deref().unwrap_or("unknown"))]
    CloudApi { code: Option<String>, message: String },

    /// Connecting to or querying the restored database failed.
    #[error("database error: {0}")]
    Database(String),

    /// A configured verification pattern did not compile.
    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A verification query produced no cell matching its pattern.
    #[error("query {query:?} produced no cell matching {pattern:?}")]
    Mismatch { query: String, pattern: String },
}

impl CheckError {
    pub fn timeout(message: impl Into<String>) -> CheckError {
        CheckError::CloudApi {
            code: Some("Timeout".to_string()),
            message: message.into(),
        }
    }
}
