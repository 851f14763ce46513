//! OpenAI-style `chat.completion.chunk` frames for Server-Sent-Events.

use serde::{Deserialize, Serialize};

pub const CHUNK_OBJECT: &str = "chat.completion.chunk";
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChunkChoice {
    pub delta: ChunkDelta,
    pub index: u32,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChunkDelta {
    pub content: String,
}

impl CompletionChunk {
    pub fn token(id: &str, model: &str, created: i64, content: &str) -> Self {
        Self::build(id, model, created, content, None)
    }

    /// Blank-content chunk closing a successful answer.
    pub fn stop(id: &str, model: &str, created: i64) -> Self {
        Self::build(id, model, created, "", Some("stop".to_string()))
    }

    fn build(
        id: &str,
        model: &str,
        created: i64,
        content: &str,
        finish_reason: Option<String>,
    ) -> Self {
        Self {
            id: id.to_string(),
            object: CHUNK_OBJECT.to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    content: content.to_string(),
                },
                index: 0,
                finish_reason,
            }],
        }
    }

    pub fn content(&self) -> &str {
        self.choices
            .first()
            .map(|c| c.delta.content.as_str())
            .unwrap_or("")
    }
}

/// `data: {json}\n\n`
pub fn sse_frame(chunk: &CompletionChunk) -> String {
    format!("data: {}\n\n", serde_json::to_string(chunk).unwrap_or_default())
}
