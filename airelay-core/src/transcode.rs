//! Per-line decoding of upstream stream events into canonical increments.

use serde::{Deserialize, Serialize};

use crate::model::{as_text, ChatCompletionsStreamResponse, CompletionsStreamResponse};

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "data: [DONE]";

/// Anything shorter cannot hold `data: ` plus a payload.
const MIN_LINE_LEN: usize = 6;

const FINISH_STOP: &str = "stop";

/// Which upstream response schema governs decoding.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    #[default]
    ChatCompletions,
    Completions,
}

impl RelayMode {
    pub fn decoder(self) -> &'static dyn ChunkDecoder {
        match self {
            Self::ChatCompletions => &ChatCompletionsDecoder,
            Self::Completions => &CompletionsDecoder,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChatCompletions => "chat_completions",
            Self::Completions => "completions",
        }
    }
}

impl std::str::FromStr for RelayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" | "chat_completions" => Ok(Self::ChatCompletions),
            "completions" => Ok(Self::Completions),
            other => Err(format!("unknown relay mode '{other}'")),
        }
    }
}

/// One tool-call piece seen in a delta.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: u32,
    pub name: String,
    pub arguments: String,
}

/// Canonical unit decoded from one stream event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedIncrement {
    pub text_delta: String,
    pub tool_calls: Vec<ToolCallFragment>,
    /// Largest number of tool-call entries carried by a single choice.
    pub tool_call_width: usize,
    pub finish_reason: Option<String>,
}

impl DecodedIncrement {
    pub fn is_stop(&self) -> bool {
        self.finish_reason.as_deref() == Some(FINISH_STOP)
    }

    fn note_finish(&mut self, reason: Option<&str>) {
        match reason {
            Some(FINISH_STOP) => self.finish_reason = Some(FINISH_STOP.to_string()),
            Some(r) if !r.is_empty() && self.finish_reason.is_none() => {
                self.finish_reason = Some(r.to_string())
            }
            _ => {}
        }
    }
}

/// Schema-specific decoding of a `data: ` payload.
pub trait ChunkDecoder: Send + Sync {
    fn decode(&self, json: &str) -> serde_json::Result<DecodedIncrement>;
}

pub struct ChatCompletionsDecoder;

impl ChunkDecoder for ChatCompletionsDecoder {
    fn decode(&self, json: &str) -> serde_json::Result<DecodedIncrement> {
        let resp: ChatCompletionsStreamResponse = serde_json::from_str(json)?;
        let mut inc = DecodedIncrement::default();
        for choice in &resp.choices {
            inc.text_delta.push_str(as_text(choice.delta.content.as_ref()));
            if let Some(calls) = &choice.delta.tool_calls {
                inc.tool_call_width = inc.tool_call_width.max(calls.len());
                for (pos, call) in calls.iter().enumerate() {
                    let name = as_text(call.function.name.as_ref());
                    let arguments = as_text(call.function.arguments.as_ref());
                    inc.text_delta.push_str(name);
                    inc.text_delta.push_str(arguments);
                    inc.tool_calls.push(ToolCallFragment {
                        index: call.index.unwrap_or(pos as u32),
                        name: name.to_string(),
                        arguments: arguments.to_string(),
                    });
                }
            }
            inc.note_finish(choice.finish_reason.as_deref());
        }
        Ok(inc)
    }
}

pub struct CompletionsDecoder;

impl ChunkDecoder for CompletionsDecoder {
    fn decode(&self, json: &str) -> serde_json::Result<DecodedIncrement> {
        let resp: CompletionsStreamResponse = serde_json::from_str(json)?;
        let mut inc = DecodedIncrement::default();
        for choice in &resp.choices {
            if let Some(text) = &choice.text {
                inc.text_delta.push_str(text);
            }
            inc.note_finish(choice.finish_reason.as_deref());
        }
        Ok(inc)
    }
}

/// What a single raw line amounts to.
#[derive(Debug, PartialEq, Eq)]
pub enum Transcoded {
    /// Keep-alive, comment, too short, or undecodable.
    Skip,
    /// The terminal sentinel.
    Done,
    Increment(DecodedIncrement),
}

pub fn transcode(line: &str, mode: RelayMode) -> Transcoded {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.len() < MIN_LINE_LEN {
        return Transcoded::Skip;
    }
    if line == DONE_SENTINEL {
        return Transcoded::Done;
    }
    let Some(json) = line.strip_prefix(DATA_PREFIX) else {
        return Transcoded::Skip;
    };
    match mode.decoder().decode(json) {
        Ok(inc) => Transcoded::Increment(inc),
        Err(e) => {
            tracing::warn!(
                error = %e,
                mode = mode.as_str(),
                line = %truncate(line, 200),
                "skipping undecodable stream event"
            );
            Transcoded::Skip
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
