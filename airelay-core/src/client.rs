//! Client-facing writer seam.
//!
//! The relay never owns the connection; it writes through a [`ClientWriter`]
//! supplied by the surrounding transport.

use std::io;

use async_trait::async_trait;
use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, StatusCode};
use tokio::io::{AsyncWrite, AsyncWriteExt};

#[async_trait]
pub trait ClientWriter: Send {
    /// Status line and headers; called once before any body bytes.
    async fn write_head(&mut self, status: StatusCode, headers: &HeaderMap) -> io::Result<()>;

    /// One server-sent event whose payload is the already-framed `data` line.
    async fn write_event(&mut self, data: &str) -> io::Result<()>;

    /// A complete, non-streamed body.
    async fn write_body(&mut self, body: &[u8]) -> io::Result<()>;
}

/// Headers for a `text/event-stream` response.
pub fn event_stream_headers() -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    h.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    h.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    h.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    h.insert("x-accel-buffering", HeaderValue::from_static("no"));
    h
}

/// Captures everything written; can simulate a client that goes away.
#[derive(Debug, Default)]
pub struct BufferedClient {
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
    pub events: Vec<String>,
    pub body: Vec<u8>,
    disconnect_after: Option<usize>,
}

impl BufferedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `n` events, then fail every further write with `BrokenPipe`.
    pub fn disconnect_after(n: usize) -> Self {
        Self {
            disconnect_after: Some(n),
            ..Default::default()
        }
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn check_connected(&self) -> io::Result<()> {
        match self.disconnect_after {
            Some(n) if self.events.len() >= n => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "client disconnected",
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ClientWriter for BufferedClient {
    async fn write_head(&mut self, status: StatusCode, headers: &HeaderMap) -> io::Result<()> {
        self.status = Some(status);
        self.headers = headers.clone();
        Ok(())
    }

    async fn write_event(&mut self, data: &str) -> io::Result<()> {
        self.check_connected()?;
        self.events.push(data.to_string());
        self.body.extend_from_slice(data.as_bytes());
        self.body.extend_from_slice(b"\n\n");
        Ok(())
    }

    async fn write_body(&mut self, body: &[u8]) -> io::Result<()> {
        self.check_connected()?;
        self.body.extend_from_slice(body);
        Ok(())
    }
}

/// Renders an HTTP/1.1-style response onto any async writer.
pub struct IoClient<W> {
    inner: W,
    head_written: bool,
}

impl<W> IoClient<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            head_written: false,
        }
    }

    /// True once a status line has gone out; later errors cannot change it.
    pub fn head_written(&self) -> bool {
        self.head_written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[async_trait]
impl<W> ClientWriter for IoClient<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_head(&mut self, status: StatusCode, headers: &HeaderMap) -> io::Result<()> {
        self.inner
            .write_all(format!("HTTP/1.1 {status}\r\n").as_bytes())
            .await?;
        for (name, value) in headers {
            self.inner.write_all(name.as_str().as_bytes()).await?;
            self.inner.write_all(b": ").await?;
            self.inner.write_all(value.as_bytes()).await?;
            self.inner.write_all(b"\r\n").await?;
        }
        self.inner.write_all(b"\r\n").await?;
        self.head_written = true;
        self.inner.flush().await
    }

    async fn write_event(&mut self, data: &str) -> io::Result<()> {
        self.inner.write_all(data.as_bytes()).await?;
        self.inner.write_all(b"\n\n").await?;
        self.inner.flush().await
    }

    async fn write_body(&mut self, body: &[u8]) -> io::Result<()> {
        self.inner.write_all(body).await?;
        self.inner.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_stream_headers_are_complete() {
        let h = event_stream_headers();
        assert_eq!(h.get(CONTENT_TYPE).unwrap(), "text/event-stream");
        assert_eq!(h.get(CACHE_CONTROL).unwrap(), "no-cache");
        assert_eq!(h.get(CONNECTION).unwrap(), "keep-alive");
        assert_eq!(h.get("x-accel-buffering").unwrap(), "no");
    }

    #[tokio::test]
    async fn buffered_client_frames_events() {
        let mut c = BufferedClient::new();
        c.write_head(StatusCode::OK, &event_stream_headers()).await.unwrap();
        c.write_event("data: a").await.unwrap();
        c.write_event("data: [DONE]").await.unwrap();
        assert_eq!(c.status, Some(StatusCode::OK));
        assert_eq!(c.body_str(), "data: a\n\ndata: [DONE]\n\n");
    }

    #[tokio::test]
    async fn buffered_client_disconnects() {
        let mut c = BufferedClient::disconnect_after(1);
        c.write_event("data: a").await.unwrap();
        let err = c.write_event("data: b").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(c.events, vec!["data: a"]);
    }

    #[tokio::test]
    async fn io_client_renders_http_response() {
        let mut c = IoClient::new(Vec::<u8>::new());
        assert!(!c.head_written());
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        c.write_head(StatusCode::OK, &h).await.unwrap();
        c.write_body(b"{}").await.unwrap();
        assert!(c.head_written());
        let out = String::from_utf8(c.into_inner()).unwrap();
        assert_eq!(out, "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\r\n{}");
    }
}
