//! Attribute keys shared by relay spans and [`RelayLog::attributes`](super::RelayLog::attributes).
//! Dashboards query these names; treat renames as breaking.

pub const KEY_MODEL: &str = "llm.model";
pub const KEY_RELAY_MODE: &str = "relay.mode";
pub const KEY_STREAM: &str = "relay.stream";
pub const KEY_UPSTREAM_STATUS: &str = "upstream.status";

pub const KEY_TOOL_CALLS: &str = "relay.tool_calls";
pub const KEY_TRAILER_INJECTED: &str = "relay.trailer_injected";
pub const KEY_CLIENT_DISCONNECTED: &str = "relay.client_disconnected";

pub const KEY_TOKENS_PROMPT: &str = "tokens.prompt";
pub const KEY_TOKENS_COMPLETION: &str = "tokens.completion";
pub const KEY_TOKENS_TOTAL: &str = "tokens.total";

pub const KEY_ERROR_CODE: &str = "error.code";
