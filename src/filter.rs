//! The body filter: eligibility checks, capture and output selection.

use crate::config::FilterConfig;
use crate::context::{RequestContext, RequestInfo, VariableResolver};
use crate::error::{BoxError, ConfigError, FilterError};
use crate::handler::Handler;
use crate::recorder::{BufferedResponse, CaptureRecorder, Captured};
use crate::rewrite::Rewriter;
use crate::writer::ResponseWriter;
use async_trait::async_trait;
use http::header::CONTENT_LENGTH;
use http::HeaderValue;
use regex::Regex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// What the filter did with one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Path did not match; the next stage wrote to the real writer directly
    Bypassed,
    /// Body exceeded the cap and was streamed through unmodified
    Streamed,
    /// Content-Type matched and the body went through the rewrite engine
    Rewritten {
        /// Number of matches replaced
        replacements: usize,
    },
    /// Content-Type did not match; the buffered body was sent unchanged
    Passthrough,
}

/// Response body rewriting filter.
///
/// Immutable once built and safe to share between concurrently handled
/// requests.
pub struct BodyFilter {
    content_type: Regex,
    path: Regex,
    rewriter: Rewriter,
    max_size: usize,
    stats: FilterStats,
}

impl BodyFilter {
    /// Compile a filter from configuration.
    pub fn new(config: &FilterConfig) -> Result<Self, ConfigError> {
        if config.max_size == 0 {
            return Err(ConfigError::ZeroMaxSize);
        }

        let content_type =
            Regex::new(&config.content_type).map_err(ConfigError::InvalidContentType)?;
        // An empty pattern means no search pattern: bodies are left alone.
        let search = if config.search_pattern.is_empty() {
            None
        } else {
            Some(
                regex::bytes::Regex::new(&config.search_pattern)
                    .map_err(ConfigError::InvalidSearchPattern)?,
            )
        };
        let path = Regex::new(&config.path).map_err(ConfigError::InvalidPath)?;

        debug!(
            content_type = %config.content_type,
            search_pattern = %config.search_pattern,
            path = %config.path,
            max_size = config.max_size,
            "Body filter compiled"
        );

        Ok(Self {
            content_type,
            path,
            rewriter: Rewriter::new(search, config.replacement.as_bytes()),
            max_size: config.max_size,
            stats: FilterStats::default(),
        })
    }

    /// Create from a YAML configuration string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: FilterConfig = serde_yaml::from_str(yaml)?;
        Self::new(&config)
    }

    /// Create from a JSON configuration string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: FilterConfig = serde_json::from_str(json)?;
        Self::new(&config)
    }

    /// Cap on the buffered body size.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Whether the filter engages for a request path.
    pub fn matches_path(&self, path: &str) -> bool {
        self.path.is_match(path)
    }

    /// Whether a response with this Content-Type gets rewritten.
    pub fn matches_content_type(&self, content_type: &str) -> bool {
        self.content_type.is_match(content_type)
    }

    /// Counters since the filter was built.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run `next` for `request`, rewriting its response on the way to `writer`.
    ///
    /// An error from `next` is always returned, whatever happened to the
    /// response. Forwarding errors are returned when `next` succeeded and
    /// logged otherwise.
    pub async fn handle(
        &self,
        writer: &mut dyn ResponseWriter,
        request: &RequestInfo,
        variables: &dyn VariableResolver,
        next: &dyn Handler,
    ) -> Result<FilterOutcome, FilterError> {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);

        if !self.path.is_match(&request.path) {
            trace!(path = %request.path, "Path does not match, bypassing body filter");
            self.stats.bypassed.fetch_add(1, Ordering::Relaxed);
            next.process(writer, request)
                .await
                .map_err(FilterError::Downstream)?;
            return Ok(FilterOutcome::Bypassed);
        }

        let mut recorder = CaptureRecorder::new(self.max_size, &mut *writer);
        let next_result = next.process(&mut recorder, request).await;
        let flush_failed = recorder.flush_failed();

        let emitted = match recorder.finish() {
            Captured::Streamed if flush_failed => {
                warn!(
                    path = %request.path,
                    max_size = self.max_size,
                    "Failed to flush buffered response on overflow"
                );
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Ok(FilterOutcome::Streamed)
            }
            Captured::Streamed => {
                debug!(
                    path = %request.path,
                    max_size = self.max_size,
                    "Response exceeded buffer cap, streamed without rewriting"
                );
                self.stats.streamed.fetch_add(1, Ordering::Relaxed);
                Ok(FilterOutcome::Streamed)
            }
            Captured::Buffered(buffered) => self.emit(buffered, writer, request, variables).await,
        };

        if let Err(ref e) = emitted {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            if next_result.is_err() {
                warn!(path = %request.path, error = %e, "Failed to forward filtered response");
            }
        }

        match next_result {
            Err(e) => Err(FilterError::Downstream(e)),
            Ok(()) => emitted,
        }
    }

    /// Send a buffered response, rewritten if its Content-Type matches.
    async fn emit(
        &self,
        mut buffered: BufferedResponse,
        writer: &mut dyn ResponseWriter,
        request: &RequestInfo,
        variables: &dyn VariableResolver,
    ) -> Result<FilterOutcome, FilterError> {
        if !self.content_type.is_match(buffered.content_type()) {
            trace!(
                path = %request.path,
                content_type = buffered.content_type(),
                "Content-Type does not match, passing buffered body through"
            );
            buffered.send_head(writer);
            writer
                .write_all(&buffered.body)
                .await
                .map_err(FilterError::CopyBody)?;
            self.stats.passthrough.fetch_add(1, Ordering::Relaxed);
            return Ok(FilterOutcome::Passthrough);
        }

        let rewritten = self.rewriter.rewrite(&buffered.body, variables);
        if rewritten.replacements > 0 && buffered.headers.contains_key(CONTENT_LENGTH) {
            buffered
                .headers
                .insert(CONTENT_LENGTH, HeaderValue::from(rewritten.body.len()));
        }

        buffered.send_head(writer);
        writer
            .write_all(&rewritten.body)
            .await
            .map_err(FilterError::CopyRewritten)?;

        self.stats.rewritten.fetch_add(1, Ordering::Relaxed);
        info!(
            path = %request.path,
            status = buffered.status.as_u16(),
            replacements = rewritten.replacements,
            original_bytes = buffered.body.len(),
            bytes = rewritten.body.len(),
            "Rewrote response body"
        );

        Ok(FilterOutcome::Rewritten {
            replacements: rewritten.replacements,
        })
    }
}

#[derive(Debug, Default)]
struct FilterStats {
    requests: AtomicU64,
    bypassed: AtomicU64,
    rewritten: AtomicU64,
    passthrough: AtomicU64,
    streamed: AtomicU64,
    errors: AtomicU64,
}

impl FilterStats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            rewritten: self.rewritten.load(Ordering::Relaxed),
            passthrough: self.passthrough.load(Ordering::Relaxed),
            streamed: self.streamed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the filter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Requests handled
    pub requests: u64,
    /// Requests whose path did not match
    pub bypassed: u64,
    /// Responses rewritten
    pub rewritten: u64,
    /// Buffered responses sent unchanged
    pub passthrough: u64,
    /// Responses streamed after exceeding the cap
    pub streamed: u64,
    /// Forwarding failures, including a failed flush on overflow
    pub errors: u64,
}

/// A handler whose responses go through a [`BodyFilter`].
///
/// Variables are resolved from a [`RequestContext`] built for each request.
pub struct Filtered<H> {
    filter: Arc<BodyFilter>,
    next: H,
}

impl<H: Handler> Filtered<H> {
    /// Put `filter` in front of `next`.
    pub fn new(filter: Arc<BodyFilter>, next: H) -> Self {
        Self { filter, next }
    }

    /// The wrapped filter.
    pub fn filter(&self) -> &BodyFilter {
        &self.filter
    }
}

#[async_trait]
impl<H: Handler> Handler for Filtered<H> {
    async fn process(
        &self,
        writer: &mut dyn ResponseWriter,
        request: &RequestInfo,
    ) -> Result<(), BoxError> {
        let correlation_id = request.header("x-request-id").unwrap_or_default();
        let ctx = RequestContext::new(request.clone(), correlation_id);

        match self.filter.handle(writer, request, &ctx, &self.next).await {
            Ok(_) => Ok(()),
            Err(FilterError::Downstream(e)) => Err(e),
            Err(e) => Err(e.into()),
        }
    }
}
