//! Single-shot relay of a buffered JSON completion document.

use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::HeaderValue;
use tracing::field::Empty;
use tracing_futures::Instrument;

use crate::client::ClientWriter;
use crate::error::{CoreResult, ErrorEnvelope};
use crate::model::{TextChoice, TextResponse, Usage};
use crate::relay::RelayOptions;
use crate::telemetry::{KEY_TOKENS_COMPLETION, KEY_TOKENS_PROMPT, KEY_TOKENS_TOTAL, KEY_TRAILER_INJECTED};
use crate::upstream::UpstreamResponse;
use crate::usage::{derive_usage, needs_recount, TokenCounter};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResponseOutcome {
    pub usage: Usage,
    /// Captured only for models admitted by the text-capture gate.
    pub response_text: String,
    pub trailer_injected: bool,
}

/// Relay a non-streaming response to `client`, injecting the trailer and
/// filling in usage when the upstream left it empty.
pub async fn handle_response(
    resp: UpstreamResponse,
    opts: &RelayOptions,
    counter: &dyn TokenCounter,
    client: &mut dyn ClientWriter,
) -> CoreResult<ResponseOutcome> {
    let span = tracing::info_span!(
        "relay.response",
        llm.model = %opts.model_name,
        relay.mode = opts.relay_mode.as_str(),
        upstream.status = resp.status.as_u16(),
        tokens.prompt = Empty,
        tokens.completion = Empty,
        tokens.total = Empty,
        relay.trailer_injected = Empty,
    );
    rewrite(resp, opts, counter, client).instrument(span).await
}

/// The error a client should see for an upstream response that failed
/// outright. A provider error document passes through with the upstream status.
pub async fn upstream_failure(mut resp: UpstreamResponse) -> ErrorEnvelope {
    let body = match resp.read_body().await {
        Ok(body) => body,
        Err(e) => return ErrorEnvelope::internal(e, "read_response_body_failed"),
    };
    match serde_json::from_slice::<TextResponse>(&body) {
        Ok(doc) => {
            if let Some(api) = doc.api_error() {
                return ErrorEnvelope::upstream(api.clone(), resp.status);
            }
        }
        Err(e) => tracing::debug!(error = %e, "failed upstream body is not a completion document"),
    }
    ErrorEnvelope::wrap(
        anyhow::anyhow!("upstream responded with status {}", resp.status),
        "bad_response_status_code",
        resp.status,
    )
}

async fn rewrite(
    mut resp: UpstreamResponse,
    opts: &RelayOptions,
    counter: &dyn TokenCounter,
    client: &mut dyn ClientWriter,
) -> CoreResult<ResponseOutcome> {
    let body = resp
        .read_body()
        .await
        .map_err(|e| ErrorEnvelope::internal(e, "read_response_body_failed"))?;
    let mut doc: TextResponse = serde_json::from_slice(&body)
        .map_err(|e| ErrorEnvelope::internal(e, "unmarshal_response_body_failed"))?;

    if let Some(api) = doc.api_error() {
        tracing::debug!(error_type = %api.r#type, "passing upstream error through");
        return Err(ErrorEnvelope::upstream(api.clone(), resp.status));
    }

    let response_text = if opts.capture_text {
        doc.choices
            .last()
            .map(TextChoice::string_content)
            .unwrap_or_default()
    } else {
        String::new()
    };

    if needs_recount(&doc.usage) {
        let texts: Vec<String> = doc.choices.iter().map(TextChoice::string_content).collect();
        let extra = std::mem::take(&mut doc.usage.extra);
        doc.usage = Usage {
            extra,
            ..derive_usage(
                opts.prompt_tokens,
                texts.iter().map(String::as_str),
                &opts.model_name,
                counter,
            )
        };
    }

    let span = tracing::Span::current();
    span.record(KEY_TOKENS_PROMPT, doc.usage.prompt_tokens);
    span.record(KEY_TOKENS_COMPLETION, doc.usage.completion_tokens);
    span.record(KEY_TOKENS_TOTAL, doc.usage.total_tokens);

    let trailer_injected = !opts.fixed_content.is_empty();
    span.record(KEY_TRAILER_INJECTED, trailer_injected);

    if trailer_injected {
        let suffix = format!("\n\n{}", opts.fixed_content);
        for choice in &mut doc.choices {
            choice.append_content(&suffix);
        }
        let modified = serde_json::to_vec(&doc)
            .map_err(|e| ErrorEnvelope::internal(e, "remarshal_response_body_failed"))?;

        let mut headers = resp.headers.clone();
        headers.remove(TRANSFER_ENCODING);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(modified.len()));

        let write_failed = |e: std::io::Error| ErrorEnvelope::internal(e, "write_modified_response_body_failed");
        client.write_head(resp.status, &headers).await.map_err(write_failed)?;
        client.write_body(&modified).await.map_err(write_failed)?;
    } else {
        let copy_failed = |e: std::io::Error| ErrorEnvelope::internal(e, "copy_response_body_failed");
        client.write_head(resp.status, &resp.headers).await.map_err(copy_failed)?;
        client.write_body(&body).await.map_err(copy_failed)?;
    }

    Ok(ResponseOutcome {
        usage: doc.usage,
        response_text,
        trailer_injected,
    })
}
