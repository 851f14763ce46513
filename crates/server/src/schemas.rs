//! OpenAI-compatible request types accepted by the front door.

use docchat_core::llm::Message;
use serde::Deserialize;

/// Request body for `POST /v1/chat/completions`. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    /// Upstream model; the configured default when empty.
    #[serde(default)]
    pub model: String,
    /// Conversation so far; the last message is the question.
    pub messages: Vec<Message>,
    /// Sampling temperature for the answer (condensing always runs at 0).
    #[serde(default)]
    pub temperature: Option<f32>,
}
