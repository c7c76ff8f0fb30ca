//! Bounded response capture.
//!
//! [`CaptureRecorder`] stands in for the real response writer while the next
//! stage produces its response. It keeps status, headers and body in memory
//! until the body would grow past the cap, then flushes everything it holds
//! to the real writer and forwards all further writes untouched.

use crate::error::FilterError;
use crate::writer::ResponseWriter;
use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::io;
use tracing::{debug, trace};

/// A response held entirely in memory.
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    /// Status code, 200 unless the next stage set one
    pub status: StatusCode,
    /// Headers in the order they were recorded
    pub headers: HeaderMap,
    /// Body bytes
    pub body: Vec<u8>,
}

impl Default for BufferedResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }
}

impl BufferedResponse {
    /// First Content-Type value, empty when absent or not valid text.
    pub fn content_type(&self) -> &str {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    /// Copy headers and status to a writer. Headers go first.
    pub fn send_head(&self, writer: &mut dyn ResponseWriter) {
        for (name, value) in &self.headers {
            writer.append_header(name.clone(), value.clone());
        }
        writer.set_status(self.status);
    }
}

/// Result of a capture once the next stage is done.
#[derive(Debug)]
pub enum Captured {
    /// Never overflowed; nothing has reached the real writer yet
    Buffered(BufferedResponse),
    /// Overflowed; the response already went out through the real writer
    Streamed,
}

enum CaptureState {
    Buffering(BufferedResponse),
    Streaming,
}

/// Response writer that buffers up to `cap` body bytes.
pub struct CaptureRecorder<'w> {
    downstream: &'w mut dyn ResponseWriter,
    cap: usize,
    state: CaptureState,
    flush_failed: bool,
}

impl<'w> CaptureRecorder<'w> {
    /// Start capturing a response destined for `downstream`.
    pub fn new(cap: usize, downstream: &'w mut dyn ResponseWriter) -> Self {
        Self {
            downstream,
            cap,
            state: CaptureState::Buffering(BufferedResponse::default()),
            flush_failed: false,
        }
    }

    /// Whether the cap was exceeded. Once true, stays true.
    pub fn overflowed(&self) -> bool {
        matches!(self.state, CaptureState::Streaming)
    }

    /// Body bytes currently held in memory.
    pub fn buffered_len(&self) -> usize {
        match &self.state {
            CaptureState::Buffering(buffered) => buffered.body.len(),
            CaptureState::Streaming => 0,
        }
    }

    /// Whether sending the buffered response to the real writer failed.
    pub fn flush_failed(&self) -> bool {
        self.flush_failed
    }

    /// Send the buffered head and body to the real writer and switch to
    /// pass-through. Returns the number of body bytes flushed.
    ///
    /// # Panics
    ///
    /// Panics if the recorder is already streaming: the head would be sent
    /// twice.
    pub async fn flush_and_switch(&mut self) -> Result<u64, FilterError> {
        let buffered = match std::mem::replace(&mut self.state, CaptureState::Streaming) {
            CaptureState::Buffering(buffered) => buffered,
            CaptureState::Streaming => {
                panic!("flush_and_switch called on a response that is already streaming")
            }
        };

        buffered.send_head(&mut *self.downstream);
        if let Err(e) = self.downstream.write_all(&buffered.body).await {
            self.flush_failed = true;
            return Err(FilterError::Flush(e));
        }

        Ok(buffered.body.len() as u64)
    }

    /// Stop capturing and hand back what was kept, if anything.
    pub fn finish(self) -> Captured {
        match self.state {
            CaptureState::Buffering(buffered) => Captured::Buffered(buffered),
            CaptureState::Streaming => Captured::Streamed,
        }
    }

    fn buffering(&mut self, operation: &str) -> &mut BufferedResponse {
        match &mut self.state {
            CaptureState::Buffering(buffered) => buffered,
            CaptureState::Streaming => {
                panic!("{operation} called after the response started streaming")
            }
        }
    }
}

#[async_trait]
impl<'w> ResponseWriter for CaptureRecorder<'w> {
    /// # Panics
    ///
    /// Panics once the recorder is streaming.
    fn set_status(&mut self, status: StatusCode) {
        self.buffering("set_status").status = status;
    }

    /// # Panics
    ///
    /// Panics once the recorder is streaming.
    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.buffering("set_header").headers.insert(name, value);
    }

    /// # Panics
    ///
    /// Panics once the recorder is streaming.
    fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.buffering("append_header").headers.append(name, value);
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let overflows = match &mut self.state {
            CaptureState::Buffering(buffered) => {
                let prospective = buffered.body.len() + buf.len();
                if prospective <= self.cap {
                    buffered.body.extend_from_slice(buf);
                    trace!(buffered = buffered.body.len(), "Buffered response chunk");
                    return Ok(buf.len());
                }
                debug!(
                    cap = self.cap,
                    prospective, "Response exceeds buffer cap, switching to pass-through"
                );
                true
            }
            CaptureState::Streaming => false,
        };

        if overflows {
            self.flush_and_switch().await.map_err(io::Error::other)?;
        }

        self.downstream.write(buf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ResponseBuffer;
    use http::header::{CONTENT_TYPE, SET_COOKIE};

    #[tokio::test]
    async fn test_buffers_under_cap() {
        let mut real = ResponseBuffer::new();
        let mut recorder = CaptureRecorder::new(10, &mut real);

        assert_eq!(recorder.write(b"01234").await.unwrap(), 5);
        assert_eq!(recorder.write(b"56789").await.unwrap(), 5);
        assert!(!recorder.overflowed());
        assert_eq!(recorder.buffered_len(), 10);

        match recorder.finish() {
            Captured::Buffered(buffered) => assert_eq!(buffered.body, b"0123456789"),
            Captured::Streamed => panic!("should not overflow at exactly the cap"),
        }
        assert!(real.body().is_empty());
        assert_eq!(real.status_writes(), 0);
    }

    #[tokio::test]
    async fn test_single_write_larger_than_cap() {
        let mut real = ResponseBuffer::new();
        let mut recorder = CaptureRecorder::new(10, &mut real);

        let n = recorder.write(b"0123456789ABCDEF").await.unwrap();
        assert_eq!(n, 16);
        assert!(recorder.overflowed());
        assert!(matches!(recorder.finish(), Captured::Streamed));
        assert_eq!(real.body(), b"0123456789ABCDEF");
    }

    #[tokio::test]
    async fn test_overflow_preserves_order_and_head() {
        let mut real = ResponseBuffer::new();
        let mut recorder = CaptureRecorder::new(8, &mut real);

        recorder.set_status(StatusCode::ACCEPTED);
        recorder.append_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        recorder.append_header(SET_COOKIE, HeaderValue::from_static("a=1"));
        recorder.append_header(SET_COOKIE, HeaderValue::from_static("b=2"));

        recorder.write(b"abcde").await.unwrap();
        recorder.write(b"fghij").await.unwrap();
        assert!(recorder.overflowed());
        recorder.write(b"klm").await.unwrap();
        recorder.write(b"").await.unwrap();
        assert!(recorder.overflowed());
        drop(recorder);

        assert_eq!(real.body(), b"abcdefghijklm");
        assert_eq!(real.status(), StatusCode::ACCEPTED);
        assert_eq!(real.status_writes(), 1);
        assert_eq!(real.header("content-type"), Some("text/plain"));
        let cookies: Vec<_> = real.headers().get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[tokio::test]
    async fn test_zero_length_writes_never_overflow() {
        let mut real = ResponseBuffer::new();
        let mut recorder = CaptureRecorder::new(0, &mut real);

        assert_eq!(recorder.write(b"").await.unwrap(), 0);
        assert!(!recorder.overflowed());

        recorder.write(b"x").await.unwrap();
        assert!(recorder.overflowed());
    }

    #[tokio::test]
    async fn test_flush_failure_is_reported() {
        let mut real = ResponseBuffer::failing_after(3);
        let mut recorder = CaptureRecorder::new(4, &mut real);

        recorder.write(b"abcd").await.unwrap();
        let err = recorder.write(b"efgh").await.unwrap_err();
        assert!(err.to_string().contains("flush"));
        assert!(recorder.overflowed());
        assert!(recorder.flush_failed());
    }

    #[tokio::test]
    async fn test_manual_flush_and_switch() {
        let mut real = ResponseBuffer::new();
        let mut recorder = CaptureRecorder::new(100, &mut real);

        recorder.set_status(StatusCode::NOT_FOUND);
        recorder.write(b"gone").await.unwrap();
        assert_eq!(recorder.flush_and_switch().await.unwrap(), 4);
        recorder.write(b"!").await.unwrap();
        drop(recorder);

        assert_eq!(real.status(), StatusCode::NOT_FOUND);
        assert_eq!(real.body(), b"gone!");
    }

    #[tokio::test]
    #[should_panic(expected = "set_header called after the response started streaming")]
    async fn test_header_after_overflow_panics() {
        let mut real = ResponseBuffer::new();
        let mut recorder = CaptureRecorder::new(1, &mut real);

        recorder.write(b"too long").await.unwrap();
        recorder.set_header(CONTENT_TYPE, HeaderValue::from_static("text/html"));
    }

    #[tokio::test]
    #[should_panic(expected = "set_status called after the response started streaming")]
    async fn test_status_after_overflow_panics() {
        let mut real = ResponseBuffer::new();
        let mut recorder = CaptureRecorder::new(1, &mut real);

        recorder.write(b"too long").await.unwrap();
        recorder.set_status(StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    #[should_panic(expected = "already streaming")]
    async fn test_double_flush_panics() {
        let mut real = ResponseBuffer::new();
        let mut recorder = CaptureRecorder::new(1, &mut real);

        recorder.flush_and_switch().await.unwrap();
        let _ = recorder.flush_and_switch().await;
    }
}
