//! Request information and contextual variables.
//!
//! Placeholders in a replacement template that are not capture-group indexes
//! are looked up through a [`VariableResolver`] supplied per request.
//! [`RequestContext`] is the resolver hosts get out of the box.

use std::collections::HashMap;

/// Per-request key to string lookup.
pub trait VariableResolver: Send + Sync {
    /// Resolve a variable name, `None` when unknown.
    fn lookup(&self, name: &str) -> Option<String>;
}

impl VariableResolver for HashMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Resolver that knows no variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVariables;

impl VariableResolver for NoVariables {
    fn lookup(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Request information handed through the pipeline.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// HTTP method
    pub method: String,
    /// Request path (without query string)
    pub path: String,
    /// Query string (without leading ?)
    pub query_string: Option<String>,
    /// Parsed query parameters
    pub query_params: HashMap<String, Vec<String>>,
    /// Request headers, keyed by lowercase name
    pub headers: HashMap<String, Vec<String>>,
    /// Client IP address
    pub client_ip: String,
}

impl RequestInfo {
    /// Build request info from a method and a raw request target.
    pub fn new(method: impl Into<String>, uri: &str) -> Self {
        let (path, query_string) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (uri.to_string(), None),
        };
        let query_params = parse_query_string(query_string.as_deref());

        Self {
            method: method.into(),
            path,
            query_string,
            query_params,
            headers: HashMap::new(),
            client_ip: String::new(),
        }
    }

    /// Add a request header value.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.to_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    /// Set the client address.
    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = client_ip.into();
        self
    }

    /// Get a single header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_lowercase())
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }
}

/// Parse query string into parameter map.
fn parse_query_string(query: Option<&str>) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();

    if let Some(qs) = query {
        for part in qs.split('&') {
            if let Some((k, v)) = part.split_once('=') {
                let key = urlencoding::decode(k)
                    .unwrap_or_else(|_| k.into())
                    .to_string();
                let value = urlencoding::decode(v)
                    .unwrap_or_else(|_| v.into())
                    .to_string();
                params.entry(key).or_default().push(value);
            } else if !part.is_empty() {
                let key = urlencoding::decode(part)
                    .unwrap_or_else(|_| part.into())
                    .to_string();
                params.entry(key).or_default().push(String::new());
            }
        }
    }

    params
}

/// Variables available to replacement templates for one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The request being answered
    pub request: RequestInfo,
    /// Correlation ID
    pub correlation_id: String,
    /// When handling started
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Host-defined variables
    pub variables: HashMap<String, String>,
}

impl RequestContext {
    /// Create a new request context.
    pub fn new(request: RequestInfo, correlation_id: impl Into<String>) -> Self {
        Self {
            request,
            correlation_id: correlation_id.into(),
            timestamp: chrono::Utc::now(),
            variables: HashMap::new(),
        }
    }

    /// Add a host-defined variable.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Resolve a variable name.
    ///
    /// Supports:
    /// - `request.method`, `request.path`, `request.query`, `request.client_ip`
    /// - `request.header.<name>` - first value of a request header
    /// - `request.query_param.<name>` - first value of a query parameter
    /// - `correlation_id`
    /// - `now` - handling start time (RFC 3339)
    /// - anything added with [`RequestContext::with_variable`]
    pub fn resolve(&self, name: &str) -> Option<String> {
        let parts: Vec<&str> = name.splitn(2, '.').collect();

        let builtin = match parts[0] {
            "request" => self.resolve_request(parts.get(1).unwrap_or(&"")),
            "correlation_id" => Some(self.correlation_id.clone()),
            "now" => Some(self.timestamp.to_rfc3339()),
            _ => None,
        };

        builtin.or_else(|| self.variables.get(name).cloned())
    }

    fn resolve_request(&self, path: &str) -> Option<String> {
        let parts: Vec<&str> = path.splitn(2, '.').collect();

        match parts[0] {
            "method" => Some(self.request.method.clone()),
            "path" => Some(self.request.path.clone()),
            "query" => self.request.query_string.clone(),
            "client_ip" => Some(self.request.client_ip.clone()),
            "header" => self.request.header(parts.get(1)?).map(str::to_string),
            "query_param" => {
                let name = parts.get(1)?;
                self.request.query_params.get(*name)?.first().cloned()
            }
            _ => None,
        }
    }
}

impl VariableResolver for RequestContext {
    fn lookup(&self, name: &str) -> Option<String> {
        self.resolve(name)
    }
}
