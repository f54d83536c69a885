use serde::Serialize;
use serde_json::{Map, Value};

use super::keys::*;
use crate::model::Usage;

/// Structured record of one finished relay, streaming or not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayLog {
    pub model: Option<String>,
    pub relay_mode: Option<String>,
    pub stream: bool,
    pub upstream_status: Option<u16>,

    /// Accumulated output text (content plus tool-call fragments).
    pub text: Option<String>,
    pub tool_calls: usize,
    pub trailer_injected: bool,
    pub client_disconnected: bool,

    pub tokens_prompt: Option<u32>,
    pub tokens_completion: Option<u32>,
    pub tokens_total: Option<u32>,

    pub error_code: Option<String>,
}

impl RelayLog {
    pub fn new() -> Self { Self::default() }
    pub fn model(mut self, v: &str) -> Self { self.model = Some(v.to_string()); self }
    pub fn relay_mode(mut self, v: &str) -> Self { self.relay_mode = Some(v.to_string()); self }
    pub fn stream(mut self, v: bool) -> Self { self.stream = v; self }
    pub fn upstream_status(mut self, v: u16) -> Self { self.upstream_status = Some(v); self }
    pub fn text_opt(mut self, v: Option<&str>) -> Self { self.text = v.map(|s| s.to_string()); self }
    pub fn tool_calls(mut self, v: usize) -> Self { self.tool_calls = v; self }
    pub fn trailer_injected(mut self, v: bool) -> Self { self.trailer_injected = v; self }
    pub fn client_disconnected(mut self, v: bool) -> Self { self.client_disconnected = v; self }
    pub fn error_code(mut self, v: &str) -> Self { self.error_code = Some(v.to_string()); self }
    pub fn usage_opt(mut self, u: Option<&Usage>) -> Self {
        self.tokens_prompt = u.map(|u| u.prompt_tokens);
        self.tokens_completion = u.map(|u| u.completion_tokens);
        self.tokens_total = u.map(|u| u.total_tokens);
        self
    }

    /// Flat attribute map under the shared span keys; unset fields are omitted.
    pub fn attributes(&self) -> Map<String, Value> {
        let mut m = Map::new();
        let mut put = |k: &str, v: Value| {
            m.insert(k.to_string(), v);
        };
        if let Some(v) = &self.model {
            put(KEY_MODEL, v.as_str().into());
        }
        if let Some(v) = &self.relay_mode {
            put(KEY_RELAY_MODE, v.as_str().into());
        }
        put(KEY_STREAM, self.stream.into());
        if let Some(v) = self.upstream_status {
            put(KEY_UPSTREAM_STATUS, v.into());
        }
        put(KEY_TOOL_CALLS, self.tool_calls.into());
        put(KEY_TRAILER_INJECTED, self.trailer_injected.into());
        put(KEY_CLIENT_DISCONNECTED, self.client_disconnected.into());
        if let Some(v) = self.tokens_prompt {
            put(KEY_TOKENS_PROMPT, v.into());
        }
        if let Some(v) = self.tokens_completion {
            put(KEY_TOKENS_COMPLETION, v.into());
        }
        if let Some(v) = self.tokens_total {
            put(KEY_TOKENS_TOTAL, v.into());
        }
        if let Some(v) = &self.error_code {
            put(KEY_ERROR_CODE, v.as_str().into());
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relay_log_serializes() {
        let usage = Usage::new(10, 20, 30);
        let log = RelayLog::new()
            .model("gpt-4o")
            .relay_mode("chat_completions")
            .stream(true)
            .upstream_status(200)
            .tool_calls(2)
            .trailer_injected(true)
            .usage_opt(Some(&usage));

        let as_json = serde_json::to_value(&log).unwrap();
        assert_eq!(as_json["model"], json!("gpt-4o"));
        assert_eq!(as_json["stream"], json!(true));
        assert_eq!(as_json["upstream_status"], json!(200));
        assert_eq!(as_json["tool_calls"], json!(2));
        assert_eq!(as_json["tokens_total"], json!(30));
        assert_eq!(as_json["error_code"], json!(null));
    }

    #[test]
    fn attributes_use_span_keys() {
        let log = RelayLog::new()
            .model("gpt-4o")
            .upstream_status(429)
            .error_code("rate_limit_exceeded");
        let attrs = log.attributes();
        assert_eq!(attrs[KEY_MODEL], json!("gpt-4o"));
        assert_eq!(attrs[KEY_UPSTREAM_STATUS], json!(429));
        assert_eq!(attrs[KEY_ERROR_CODE], json!("rate_limit_exceeded"));
        assert_eq!(attrs[KEY_STREAM], json!(false));
        assert!(!attrs.contains_key(KEY_TOKENS_TOTAL));
        assert!(!attrs.contains_key(KEY_RELAY_MODE));
    }
}
