//! Client-facing chat-completion envelope types
//!
//! The relay speaks the OpenAI chat-completions wire shape on its public
//! side: request body, streamed `chat.completion.chunk` frames, and the
//! aggregate `chat.completion` response. Usage counters are always zero
//! because the upstream reports no token counts.

use std::time::{SystemTime, UNIX_EPOCH};

use freeplay_client::ChatMessage;
use serde::{Deserialize, Serialize};

/// Incoming request body for `POST /v1/chat/completions`.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Default, Serialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    fn with_delta(id: &str, created: u64, model: &str, delta: Delta, finish: Option<&'static str>) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk",
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish,
            }],
        }
    }

    /// Opening frame carrying the assistant role and an empty content.
    pub fn role_start(id: &str, created: u64, model: &str) -> Self {
        Self::with_delta(
            id,
            created,
            model,
            Delta {
                role: Some("assistant"),
                content: Some(String::new()),
            },
            None,
        )
    }

    /// One content delta, emitted per upstream content event.
    pub fn content(id: &str, created: u64, model: &str, text: String) -> Self {
        Self::with_delta(
            id,
            created,
            model,
            Delta {
                role: None,
                content: Some(text),
            },
            None,
        )
    }

    /// Closing frame with an empty delta and `finish_reason: "stop"`.
    pub fn stop(id: &str, created: u64, model: &str) -> Self {
        Self::with_delta(id, created, model, Delta::default(), Some("stop"))
    }
}

/// Aggregate response for non-streaming requests.
#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ResponseChoice>,
    pub usage: Usage,
}

#[derive(Debug, Serialize)]
pub struct ResponseChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: &'static str,
}

/// Token counters, always zero: the upstream does not report them.
#[derive(Debug, Default, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl ChatCompletionResponse {
    pub fn new(model: &str, content: String) -> Self {
        Self {
            id: chat_id(),
            object: "chat.completion",
            created: unix_now(),
            model: model.to_string(),
            choices: vec![ResponseChoice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content,
                },
                finish_reason: "stop",
            }],
            usage: Usage::default(),
        }
    }
}

/// Error envelope shared by rejected requests and in-stream failures.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>, kind: &'static str) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
                kind,
                param: None,
                code: None,
            },
        }
    }
}

/// New chat-completion id: `chatcmpl-` plus 29 hex chars.
pub fn chat_id() -> String {
    let hex = uuid::Uuid::new_v4().as_simple().to_string();
    format!("chatcmpl-{}", &hex[..29])
}

/// Seconds since the epoch, for `created` fields.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Render one SSE frame: `data: <json>\n\n`.
pub fn sse_frame<T: Serialize>(value: &T) -> String {
    // Serialization of these owned structs cannot fail.
    let json = serde_json::to_string(value).unwrap_or_default();
    format!("data: {json}\n\n")
}

pub const SSE_DONE: &str = "data: [DONE]\n\n";
