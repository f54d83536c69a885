//! Newline framing for event-stream bodies.
//!
//! Contract:
//! - Lines are split on `\n` only; a trailing `\r` is left on the line.
//! - A final partial line is flushed once at end of input.
//! - Empty reads yield nothing. The stream is single-pass.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::Stream;

/// Boxed upstream body: chunks of bytes or the read error that ended them.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Line splitter over a bytes stream; yields lines separated by '\n'.
pub struct LineStream {
    inner: ByteStream,
    buf: Vec<u8>,
    // bytes of `buf` already known to hold no '\n'
    scanned: usize,
    finished: bool,
}

impl LineStream {
    pub fn new(inner: ByteStream) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            scanned: 0,
            finished: false,
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let idx = self.buf[self.scanned..].iter().position(|b| *b == b'\n')?;
        let end = self.scanned + idx;
        let mut raw: Vec<u8> = self.buf.drain(..=end).collect();
        raw.pop();
        self.scanned = 0;
        Some(String::from_utf8_lossy(&raw).into_owned())
    }
}

impl Stream for LineStream {
    type Item = std::io::Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(line) = self.take_line() {
                return Poll::Ready(Some(Ok(line)));
            }
            self.scanned = self.buf.len();
            if self.finished {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buf.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    if self.buf.is_empty() {
                        return Poll::Ready(None);
                    }
                    let tail = std::mem::take(&mut self.buf);
                    self.scanned = 0;
                    return Poll::Ready(Some(Ok(String::from_utf8_lossy(&tail).into_owned())));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
