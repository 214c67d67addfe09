use serde::{Deserialize, Serialize};
use serde_json::Value;

// Request bodies. Required fields are still `Option` so a missing field is
// answered with our own 400 message rather than a deserializer error.

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImageRequest {
    pub image_base64: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct TranscriptRequest {
    pub transcript: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct SuggestRequest {
    pub summary: Option<String>,
    pub messages: Option<Vec<Value>>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub image_base64: Option<String>,
    pub summary: Option<String>,
    pub messages: Option<Vec<Value>>,
    // streamed text/plain unless the caller asks for a single JSON reply
    pub stream: Option<bool>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    // speaker label used when a history is flattened into one prompt
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "ユーザー",
            Role::Assistant => "アシスタント",
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

// Keep only well formed {role, content} items, anything else is dropped
pub fn valid_messages(raw: Option<Vec<Value>>) -> Vec<ChatMessage> {
    raw.unwrap_or_default()
        .into_iter()
        .filter_map(|item| serde_json::from_value::<ChatMessage>(item).ok())
        .collect()
}

// Response bodies

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct TranscriptResponse {
    pub transcript: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct SummaryResponse {
    pub summary: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct QuestionsResponse {
    pub questions: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct ChatReply {
    pub reply: String,
}

// What /api/analyze returns and what the cache stores
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AnalyzeResult {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<String>>,
}

// Treat "" the same as a missing field
pub fn required(value: Option<String>, field: &str) -> Result<String, crate::error::ApiError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| crate::error::ApiError::invalid(format!("{} is required", field)))
}
