use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Token accounting attached to a completion document.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub prompt_tokens: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub completion_tokens: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_tokens: u32,
    /// Provider breakdowns such as `prompt_tokens_details`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32, total_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
            extra: Map::new(),
        }
    }
}

/// Provider error payload (`{"error": {...}}`), kept field for field.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ApiError {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub r#type: String,
    #[serde(default)]
    pub param: Value,
    #[serde(default)]
    pub code: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ApiError {
    /// No type, message, or code: an empty placeholder rather than an error.
    pub fn is_blank(&self) -> bool {
        let no_code = match &self.code {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        };
        self.r#type.is_empty() && self.message.is_empty() && no_code
    }
}

/// Providers send `null` where a field is simply absent; read both as the default.
fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

// ---- Streaming wire structs ----

#[derive(Debug, Deserialize, Default)]
pub struct ChatCompletionsStreamResponse {
    #[serde(default)]
    pub choices: Vec<ChatStreamChoice>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ChatStreamChoice {
    #[serde(default)]
    pub delta: ChatDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ChatDelta {
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub function: FunctionDelta,
}

#[derive(Debug, Deserialize, Default)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CompletionsStreamResponse {
    #[serde(default)]
    pub choices: Vec<CompletionsStreamChoice>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CompletionsStreamChoice {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Borrow a JSON value as text; anything but a string reads as empty.
pub fn as_text(v: Option<&Value>) -> &str {
    match v {
        Some(Value::String(s)) => s.as_str(),
        _ => "",
    }
}

// ---- Non-streaming document ----

/// A full completion document. Fields this relay does not touch are kept in
/// `extra` so re-encoding does not drop them.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct TextResponse {
    #[serde(default)]
    pub choices: Vec<TextChoice>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TextResponse {
    /// The provider error, if the body carries one that says anything.
    pub fn api_error(&self) -> Option<&ApiError> {
        self.error.as_ref().filter(|e| !e.is_blank())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct TextChoice {
    /// Chat-style choices carry a message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    /// Completion-style choices carry bare text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TextChoice {
    pub fn string_content(&self) -> String {
        match (&self.message, &self.text) {
            (Some(m), _) => m.string_content(),
            (None, Some(t)) => t.clone(),
            (None, None) => String::new(),
        }
    }

    /// Append `suffix` to whichever content form the choice uses.
    pub fn append_content(&mut self, suffix: &str) {
        if let Some(msg) = self.message.as_mut() {
            let joined = msg.string_content() + suffix;
            msg.content = Value::String(joined);
        } else if let Some(text) = self.text.as_mut() {
            text.push_str(suffix);
        } else {
            self.message = Some(Message {
                content: Value::String(suffix.to_string()),
                ..Default::default()
            });
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Content as plain text. Array content concatenates its `text` parts.
    pub fn string_content(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            Value::Array(parts) => parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect(),
            _ => String::new(),
        }
    }
}

// ---- Synthetic trailer event ----

/// The chunk spliced in ahead of the withheld stop event.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct TrailerChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub choices: [TrailerChoice; 1],
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct TrailerChoice {
    pub index: u32,
    pub finish_reason: &'static str,
    pub delta: TrailerDelta,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct TrailerDelta {
    pub content: String,
    pub role: &'static str,
}

impl TrailerChunk {
    pub fn new(id: String, created: i64, trailer: &str) -> Self {
        Self {
            id,
            object: "chat.completion",
            created,
            choices: [TrailerChoice {
                index: 0,
                finish_reason: "stop",
                delta: TrailerDelta {
                    content: format!("\n\n{trailer}"),
                    role: "",
                },
            }],
        }
    }
}
