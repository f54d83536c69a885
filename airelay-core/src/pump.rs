//! Streaming relay: a producer task parses the upstream body and decides what
//! to forward; the caller's task drains a capacity-1 channel into the client.
//!
//! Contract:
//! - Lines reach the client in the order the producer forwards them; at most
//!   one line is in flight between the two tasks.
//! - A stream that completes ends with exactly one `data: [DONE]`.
//! - The accumulator is owned by the producer and only handed back once the
//!   producer has returned.
//! - When the client goes away the receiver is dropped; the producer notices,
//!   stops reading, and drops the upstream body.

use std::sync::Arc;

use futures_util::StreamExt;
use http::StatusCode;
use tokio::sync::mpsc;
use tracing::field::Empty;
use tracing_futures::Instrument;

use crate::client::{event_stream_headers, ClientWriter};
use crate::error::{CoreResult, ErrorEnvelope};
use crate::frame::LineStream;
use crate::inject::{normalize_outgoing, FixedContentInjector, StampSource};
use crate::model::Usage;
use crate::relay::RelayOptions;
use crate::telemetry::{KEY_CLIENT_DISCONNECTED, KEY_TOOL_CALLS, KEY_TRAILER_INJECTED};
use crate::transcode::{transcode, DecodedIncrement, RelayMode, Transcoded};
use crate::upstream::UpstreamResponse;
use crate::usage::{derive_usage, TokenCounter};

/// Text and tool-call tally gathered while streaming.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Accumulator {
    pub response_text: String,
    /// High-water mark of tool-call entries seen in one choice.
    pub tool_call_count: usize,
}

impl Accumulator {
    fn absorb(&mut self, inc: &DecodedIncrement) {
        self.response_text.push_str(&inc.text_delta);
        self.tool_call_count = self.tool_call_count.max(inc.tool_call_width);
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub response_text: String,
    pub tool_call_count: usize,
    pub trailer_injected: bool,
    pub client_disconnected: bool,
    /// Lines actually written to the client.
    pub events_sent: usize,
}

impl StreamOutcome {
    /// Completion usage derived from the accumulated text.
    pub fn usage(&self, prompt_tokens: u32, model: &str, counter: &dyn TokenCounter) -> Usage {
        derive_usage(prompt_tokens, [self.response_text.as_str()], model, counter)
    }
}

struct ProducerReport {
    acc: Accumulator,
    trailer_sent: bool,
    read_error: Option<std::io::Error>,
}

/// Relay an event-stream response to `client`.
pub async fn stream_handler(
    resp: UpstreamResponse,
    opts: &RelayOptions,
    stamps: Arc<dyn StampSource>,
    client: &mut dyn ClientWriter,
) -> CoreResult<StreamOutcome> {
    let span = tracing::info_span!(
        "relay.stream",
        llm.model = %opts.model_name,
        relay.mode = opts.relay_mode.as_str(),
        relay.tool_calls = Empty,
        relay.trailer_injected = Empty,
        relay.client_disconnected = Empty,
    );

    client
        .write_head(StatusCode::OK, &event_stream_headers())
        .await
        .map_err(|e| ErrorEnvelope::internal(e, "write_stream_head_failed"))?;

    let (tx, mut rx) = mpsc::channel::<String>(1);
    let injector = FixedContentInjector::new(opts.fixed_content.clone(), stamps);
    let lines = LineStream::new(resp.body);
    let producer = tokio::spawn(
        produce(lines, opts.relay_mode, injector, tx).instrument(span.clone()),
    );

    let mut outcome = StreamOutcome::default();
    while let Some(line) = rx.recv().await {
        let line = normalize_outgoing(line);
        if let Err(e) = client.write_event(&line).await {
            tracing::debug!(parent: &span, error = %e, "client went away, stopping delivery");
            outcome.client_disconnected = true;
            break;
        }
        outcome.events_sent += 1;
    }
    drop(rx);

    let report = producer.await.map_err(|e| {
        ErrorEnvelope::internal(anyhow::anyhow!("stream producer failed: {e}"), "stream_producer_failed")
    })?;

    span.record(KEY_TOOL_CALLS, report.acc.tool_call_count as u64);
    span.record(KEY_TRAILER_INJECTED, report.trailer_sent);
    span.record(KEY_CLIENT_DISCONNECTED, outcome.client_disconnected);

    if let Some(e) = report.read_error
        && !outcome.client_disconnected
    {
        return Err(ErrorEnvelope::internal(e, "read_response_body_failed"));
    }

    outcome.response_text = report.acc.response_text;
    outcome.tool_call_count = report.acc.tool_call_count;
    outcome.trailer_injected = report.trailer_sent;
    Ok(outcome)
}

async fn produce(
    mut lines: LineStream,
    mode: RelayMode,
    mut injector: FixedContentInjector,
    tx: mpsc::Sender<String>,
) -> ProducerReport {
    let mut acc = Accumulator::default();
    let mut read_error = None;

    'read: loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => break 'read,
            next = lines.next() => next,
        };
        let line = match next {
            None => break,
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "upstream body read failed");
                read_error = Some(e);
                break;
            }
        };
        let inc = match transcode(&line, mode) {
            Transcoded::Skip => continue,
            Transcoded::Done => break,
            Transcoded::Increment(inc) => inc,
        };
        acc.absorb(&inc);
        for out in injector.accept(line, &inc) {
            if tx.send(out).await.is_err() {
                break 'read;
            }
        }
        if injector.is_draining() {
            break;
        }
    }
    drop(lines);

    if read_error.is_none()
        && !tx.is_closed()
        && let Some(done) = injector.finish()
    {
        let _ = tx.send(done).await;
    }

    ProducerReport {
        acc,
        trailer_sent: injector.state().trailer_sent,
        read_error,
    }
}
