use std::sync::Arc;

use http::header::CONTENT_TYPE;

use crate::client::ClientWriter;
use crate::error::CoreResult;
use crate::inject::{StampSource, SystemStamps};
use crate::model::Usage;
use crate::pump::{stream_handler, StreamOutcome};
use crate::rewrite::{handle_response, upstream_failure, ResponseOutcome};
use crate::telemetry::{self, RelayLog};
use crate::transcode::RelayMode;
use crate::upstream::UpstreamResponse;
use crate::usage::TokenCounter;

/// Everything one relay call needs to know about its request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    pub relay_mode: RelayMode,
    pub model_name: String,
    /// Trailer text; empty disables injection.
    pub fixed_content: String,
    pub prompt_tokens: u32,
    pub stream: bool,
    pub capture_text: bool,
}

impl RelayOptions {
    pub fn new(relay_mode: RelayMode, model_name: impl Into<String>) -> Self {
        Self {
            relay_mode,
            model_name: model_name.into(),
            fixed_content: String::new(),
            prompt_tokens: 0,
            stream: false,
            capture_text: true,
        }
    }

    pub fn stream(mut self, v: bool) -> Self {
        self.stream = v;
        self
    }

    pub fn fixed_content(mut self, v: impl Into<String>) -> Self {
        self.fixed_content = v.into();
        self
    }

    pub fn prompt_tokens(mut self, v: u32) -> Self {
        self.prompt_tokens = v;
        self
    }

    pub fn capture_text(mut self, v: bool) -> Self {
        self.capture_text = v;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Stream { outcome: StreamOutcome, usage: Usage },
    Response(ResponseOutcome),
}

impl RelayOutcome {
    pub fn usage(&self) -> Usage {
        match self {
            Self::Stream { usage, .. } => usage.clone(),
            Self::Response(r) => r.usage.clone(),
        }
    }

    pub fn response_text(&self) -> &str {
        match self {
            Self::Stream { outcome, .. } => &outcome.response_text,
            Self::Response(r) => &r.response_text,
        }
    }

    pub fn trailer_injected(&self) -> bool {
        match self {
            Self::Stream { outcome, .. } => outcome.trailer_injected,
            Self::Response(r) => r.trailer_injected,
        }
    }
}

/// Relays upstream responses to clients. Holds only the external
/// capabilities; all per-request state lives in the call.
#[derive(Clone)]
pub struct Relay {
    counter: Arc<dyn TokenCounter>,
    stamps: Arc<dyn StampSource>,
}

impl Relay {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            counter,
            stamps: Arc::new(SystemStamps),
        }
    }

    pub fn with_stamps(mut self, stamps: Arc<dyn StampSource>) -> Self {
        self.stamps = stamps;
        self
    }

    /// Relay `resp` to `client` in the wire format selected by `opts.stream`.
    /// A stream request whose upstream failed gets the upstream error back
    /// before anything is written.
    pub async fn relay(
        &self,
        resp: UpstreamResponse,
        opts: &RelayOptions,
        client: &mut dyn ClientWriter,
    ) -> CoreResult<RelayOutcome> {
        let log = RelayLog::new()
            .model(&opts.model_name)
            .relay_mode(opts.relay_mode.as_str())
            .stream(opts.stream)
            .upstream_status(resp.status.as_u16());

        let result = if opts.stream && !resp.status.is_success() {
            Err(upstream_failure(resp).await)
        } else if opts.stream && streamable(&resp) {
            stream_handler(resp, opts, self.stamps.clone(), client)
                .await
                .map(|outcome| {
                    let usage =
                        outcome.usage(opts.prompt_tokens, &opts.model_name, self.counter.as_ref());
                    RelayOutcome::Stream { outcome, usage }
                })
        } else {
            if opts.stream {
                tracing::debug!(status = resp.status.as_u16(), "upstream answered a stream request with a buffered body");
            }
            handle_response(resp, opts, self.counter.as_ref(), client)
                .await
                .map(RelayOutcome::Response)
        };

        let log = match &result {
            Ok(out) => {
                let disconnected = matches!(
                    out,
                    RelayOutcome::Stream { outcome, .. } if outcome.client_disconnected
                );
                let tool_calls = match out {
                    RelayOutcome::Stream { outcome, .. } => outcome.tool_call_count,
                    RelayOutcome::Response(_) => 0,
                };
                let usage = out.usage();
                log.text_opt(Some(out.response_text()))
                    .tool_calls(tool_calls)
                    .trailer_injected(out.trailer_injected())
                    .client_disconnected(disconnected)
                    .usage_opt(Some(&usage))
            }
            Err(e) => {
                tracing::warn!(code = %e.code, status = e.status.as_u16(), error = %e.cause, "relay failed");
                log.error_code(&e.code)
            }
        };
        telemetry::emit(log);

        result
    }
}

/// An event stream, or a body that does not say what it is.
fn streamable(resp: &UpstreamResponse) -> bool {
    resp.is_event_stream() || !resp.headers.contains_key(CONTENT_TYPE)
}
