use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

use crate::config::HttpCfg;
use crate::error::{CoreResult, ErrorEnvelope, RelayError};
use crate::upstream::UpstreamResponse;

/// Request context carries tracing IDs and idempotency key.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
    pub turn_id: Option<&'a str>,
    pub idempotency_key: Option<&'a str>,
}

/// Thin wrapper around reqwest::Client for reaching the upstream provider.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| ErrorEnvelope::internal(RelayError::Http(e), "build_http_client_failed"))?;
        Ok(Self {
            inner,
            user_agent: "airelay/0.1".to_string(),
        })
    }

    /// POST JSON and hand back the raw response, whatever its status.
    /// Non-2xx bodies are left for the relay to pass through.
    pub async fn post_upstream<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<UpstreamResponse> {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent);

        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }
        if let Some(tid) = ctx.turn_id {
            req = req.header("X-Turn-Id", tid);
        }
        if let Some(ik) = ctx.idempotency_key {
            req = req.header("Idempotency-Key", ik);
        }

        let resp = req.send().await.map_err(|e| {
            tracing::warn!(error = %e, url, "upstream request failed");
            ErrorEnvelope::internal(RelayError::Http(e), "do_request_failed")
        })?;

        if let Some(id) = extract_request_id(resp.headers()) {
            tracing::debug!(upstream_request_id = %id, status = resp.status().as_u16(), "upstream responded");
        }
        Ok(UpstreamResponse::from_reqwest(resp))
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 5] = [
        "x-request-id",
        "request-id",
        "x-amzn-requestid",
        "x-amz-request-id",
        "x-cdn-request-id",
    ];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    #[tokio::test]
    async fn post_upstream_streams_body_and_headers() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("X-Request-Id", "rid")
                .header("Idempotency-Key", "ik");
            then.status(200)
                .header("content-type", "text/event-stream")
                .header("x-request-id", "abc123")
                .body("data: {\"choices\":[]}\n\ndata: [DONE]\n\n");
        });

        let client = HttpClient::new_default().unwrap();
        let ctx = RequestCtx {
            request_id: Some("rid"),
            turn_id: None,
            idempotency_key: Some("ik"),
        };
        let mut resp = client
            .post_upstream(
                &format!("{}/v1/chat/completions", server.base_url()),
                &json!({"model": "gpt-4o", "stream": true}),
                &[("Authorization", "Bearer test")],
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(resp.status, http::StatusCode::OK);
        assert!(resp.is_event_stream());
        let body = resp.read_body().await.unwrap();
        assert!(body.starts_with(b"data: {\"choices\":[]}"));
        m.assert();
    }

    #[tokio::test]
    async fn non_success_status_is_not_mapped() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(400)
                .json_body(json!({"error": {"message": "bad", "type": "invalid_request_error"}}));
        });
        let client = HttpClient::new_default().expect("client");
        let mut resp = client
            .post_upstream(
                &format!("{}/v1/chat/completions", server.base_url()),
                &json!({}),
                &[],
                &RequestCtx::default(),
            )
            .await
            .expect("4xx still yields a response");
        assert_eq!(resp.status, http::StatusCode::BAD_REQUEST);
        let body = resp.read_body().await.unwrap();
        assert!(std::str::from_utf8(&body).unwrap().contains("invalid_request_error"));
    }

    #[tokio::test]
    async fn network_error_maps_to_do_request_failed() {
        // Attempt to connect to a likely-closed port to simulate network error quickly.
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_upstream("http://127.0.0.1:9/chat", &json!({}), &[], &RequestCtx::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, "do_request_failed");
        assert!(matches!(err.cause, RelayError::Http(_)));
    }

    #[test]
    fn request_id_candidates() {
        let mut h = reqwest::header::HeaderMap::new();
        h.insert("x-amz-request-id", "amz-1".parse().unwrap());
        assert_eq!(extract_request_id(&h), Some("amz-1".into()));
        assert_eq!(extract_request_id(&reqwest::header::HeaderMap::new()), None);
    }

    #[test]
    fn from_cfg_applies_pool_cap() {
        let cfg = HttpCfg {
            pool_max_idle_per_host: Some(2),
            ..HttpCfg::default()
        };
        assert!(HttpClient::from_cfg(&cfg).is_ok());
    }
}
