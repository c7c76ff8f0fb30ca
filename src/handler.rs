//! Pipeline stages.

use crate::context::RequestInfo;
use crate::error::BoxError;
use crate::writer::ResponseWriter;
use async_trait::async_trait;
use http::{HeaderMap, StatusCode};

/// A stage that produces a response for a request.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Write the response for `request` into `writer`.
    async fn process(
        &self,
        writer: &mut dyn ResponseWriter,
        request: &RequestInfo,
    ) -> Result<(), BoxError>;
}

/// Serves the same response to every request.
#[derive(Debug, Clone)]
pub struct StaticHandler {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    chunk_size: usize,
}

impl StaticHandler {
    /// Respond with `body` and status 200, in a single write.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: body.into(),
            chunk_size: 0,
        }
    }

    /// Set the status code.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Set the response headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Write the body in chunks of at most `chunk_size` bytes (0 = one write).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

#[async_trait]
impl Handler for StaticHandler {
    async fn process(
        &self,
        writer: &mut dyn ResponseWriter,
        _request: &RequestInfo,
    ) -> Result<(), BoxError> {
        for (name, value) in &self.headers {
            writer.append_header(name.clone(), value.clone());
        }
        writer.set_status(self.status);

        if self.chunk_size == 0 {
            writer.write_all(&self.body).await?;
        } else {
            for chunk in self.body.chunks(self.chunk_size) {
                writer.write_all(chunk).await?;
            }
        }
        Ok(())
    }
}
