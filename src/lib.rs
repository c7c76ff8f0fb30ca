//! Response body rewriting filter for Zentinel.
//!
//! The filter sits in front of another pipeline stage and rewrites the bodies
//! of its responses:
//!
//! - Engages only for request paths matching a regex
//! - Buffers the response up to a byte cap, streaming it through untouched
//!   once the cap is exceeded
//! - Rewrites bodies whose Content-Type matches a regex, replacing every
//!   match of a search pattern with a template
//! - Templates reference capture groups (`{1}`) and request variables
//!   (`{request.path}`)
//!
//! ## Configuration Example
//!
//! ```yaml
//! content_type: "^text/html"
//! search_pattern: "http://(internal\\.example\\.com)"
//! replacement: "https://{1}"
//! max_size: 1048576
//! path: "^/docs/"
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod handler;
pub mod recorder;
pub mod rewrite;
pub mod writer;

pub use config::FilterConfig;
pub use context::{RequestContext, RequestInfo, VariableResolver};
pub use error::{BoxError, ConfigError, FilterError};
pub use filter::{BodyFilter, FilterOutcome, Filtered};
pub use handler::{Handler, StaticHandler};
pub use recorder::CaptureRecorder;
pub use writer::{ResponseBuffer, ResponseWriter};
