//! Configuration types for the body filter.

use serde::{Deserialize, Serialize};

/// Default cap on the buffered body size (2 MiB).
pub const DEFAULT_MAX_SIZE: usize = 2 * 1024 * 1024;

/// Filter configuration, as read from YAML or JSON.
///
/// Compiled into a [`BodyFilter`](crate::BodyFilter) before any request is
/// handled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    /// Regex the response Content-Type must match for the body to be rewritten
    pub content_type: String,
    /// Regex located within the response body
    pub search_pattern: String,
    /// Replacement template (supports `{N}` and `{variable}` placeholders)
    #[serde(default)]
    pub replacement: String,
    /// Maximum body size to buffer for rewriting (bytes)
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Regex the request path must match for the filter to engage
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_max_size() -> usize {
    DEFAULT_MAX_SIZE
}

fn default_path() -> String {
    ".*".to_string()
}

impl FilterConfig {
    /// Create a configuration with defaults for the optional fields.
    pub fn new(content_type: impl Into<String>, search_pattern: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            search_pattern: search_pattern.into(),
            replacement: String::new(),
            max_size: DEFAULT_MAX_SIZE,
            path: default_path(),
        }
    }

    /// Set the replacement template.
    pub fn with_replacement(mut self, replacement: impl Into<String>) -> Self {
        self.replacement = replacement.into();
        self
    }

    /// Set the buffer cap.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the request path pattern.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let yaml = r#"
content_type: "text/.*"
search_pattern: "foo"
"#;
        let config: FilterConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.content_type, "text/.*");
        assert_eq!(config.search_pattern, "foo");
        assert_eq!(config.replacement, "");
        assert_eq!(config.max_size, 2 * 1024 * 1024);
        assert_eq!(config.path, ".*");
    }

    #[test]
    fn test_config_parsing() {
        let yaml = r#"
content_type: "^text/html"
search_pattern: "(\\w+)@(\\w+)"
replacement: "{2}-{1}"
max_size: 4096
path: "^/api/"
"#;
        let config: FilterConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.search_pattern, r"(\w+)@(\w+)");
        assert_eq!(config.replacement, "{2}-{1}");
        assert_eq!(config.max_size, 4096);
        assert_eq!(config.path, "^/api/");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let yaml = r#"
content_type: "text/.*"
search_pattern: "foo"
replacment: "typo"
"#;
        let err = serde_yaml::from_str::<FilterConfig>(yaml).unwrap_err();
        assert!(err.to_string().contains("replacment"));
    }

    #[test]
    fn test_malformed_max_size_rejected() {
        let json = r#"{"content_type": "text/.*", "search_pattern": "foo", "max_size": "lots"}"#;
        assert!(serde_json::from_str::<FilterConfig>(json).is_err());

        let json = r#"{"content_type": "text/.*", "search_pattern": "foo", "max_size": -1}"#;
        assert!(serde_json::from_str::<FilterConfig>(json).is_err());
    }

    #[test]
    fn test_required_fields() {
        let json = r#"{"content_type": "text/.*"}"#;
        let err = serde_json::from_str::<FilterConfig>(json).unwrap_err();
        assert!(err.to_string().contains("search_pattern"));
    }

    #[test]
    fn test_builder() {
        let config = FilterConfig::new("json", "x")
            .with_replacement("y")
            .with_max_size(10)
            .with_path("^/a");
        assert_eq!(config.replacement, "y");
        assert_eq!(config.max_size, 10);
        assert_eq!(config.path, "^/a");
    }
}
