//! Error types.

use std::io;

/// Error type the next pipeline stage reports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while building a filter from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid content_type: {0}")]
    InvalidContentType(#[source] regex::Error),

    #[error("invalid search_pattern: {0}")]
    InvalidSearchPattern(#[source] regex::Error),

    #[error("invalid path: {0}")]
    InvalidPath(#[source] regex::Error),

    #[error("max_size must be greater than zero")]
    ZeroMaxSize,

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while handling a response.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// The next stage failed; carried through unchanged.
    #[error(transparent)]
    Downstream(BoxError),

    #[error("failed to flush buffered response: {0}")]
    Flush(#[source] io::Error),

    #[error("error when copying response body: {0}")]
    CopyBody(#[source] io::Error),

    #[error("error when copying replaced response body: {0}")]
    CopyRewritten(#[source] io::Error),
}

impl FilterError {
    /// Whether the error came from the next stage rather than the filter.
    pub fn is_downstream(&self) -> bool {
        matches!(self, Self::Downstream(_))
    }
}
