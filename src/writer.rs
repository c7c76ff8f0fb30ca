//! Response sinks.
//!
//! [`ResponseWriter`] is the boundary the filter shares with the host
//! pipeline: the next stage writes its status, headers and body through it.

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Destination for one HTTP response.
#[async_trait]
pub trait ResponseWriter: Send {
    /// Set the response status code.
    fn set_status(&mut self, status: StatusCode);

    /// Replace all values of a header.
    fn set_header(&mut self, name: HeaderName, value: HeaderValue);

    /// Add a value to a header, keeping existing values.
    fn append_header(&mut self, name: HeaderName, value: HeaderValue);

    /// Write body bytes, returning how many were accepted.
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Write the whole buffer, retrying on short writes.
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut remaining = buf;
        while !remaining.is_empty() {
            match self.write(remaining).await? {
                0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write whole response body",
                    ))
                }
                n => remaining = &remaining[n..],
            }
        }
        Ok(())
    }
}

/// In-memory response, the way a test recorder keeps one.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
    status_writes: usize,
    fail_after: Option<usize>,
}

impl ResponseBuffer {
    /// Create an empty response buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer whose writes fail once the body holds `limit` bytes.
    pub fn failing_after(limit: usize) -> Self {
        Self {
            fail_after: Some(limit),
            ..Self::default()
        }
    }

    /// Status code, 200 if never set.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// How many times the status was set.
    pub fn status_writes(&self) -> usize {
        self.status_writes
    }

    /// Recorded headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Body bytes written so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consume the buffer, returning the body.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

#[async_trait]
impl ResponseWriter for ResponseBuffer {
    fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
        self.status_writes += 1;
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(limit) = self.fail_after {
            if self.body.len() + buf.len() > limit {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away"));
            }
        }
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }
}

/// Writer that sends body bytes to an async byte sink and keeps the head.
pub struct IoResponseWriter<W> {
    inner: W,
    status: StatusCode,
    headers: HeaderMap,
    bytes_written: u64,
}

impl<W> IoResponseWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap an async sink.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            bytes_written: 0,
        }
    }

    /// Status code the response ended up with.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Headers the response ended up with.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Total body bytes forwarded to the sink.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush the sink and hand it back.
    pub async fn finish(mut self) -> io::Result<W> {
        self.inner.flush().await?;
        Ok(self.inner)
    }
}

#[async_trait]
impl<W> ResponseWriter for IoResponseWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf).await?;
        self.bytes_written += n as u64;
        Ok(n)
    }
}
