use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system<S: Into<String>>(s: S) -> Self {
        Self {
            role: Role::System,
            content: s.into(),
        }
    }
    pub fn user<S: Into<String>>(s: S) -> Self {
        Self {
            role: Role::User,
            content: s.into(),
        }
    }
    pub fn assistant<S: Into<String>>(s: S) -> Self {
        Self {
            role: Role::Assistant,
            content: s.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChatOpts {
    pub model: String,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatOpts {
    pub fn new<S: Into<String>>(model: S) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            top_p: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChatDelta {
    RoleStart(Role),
    Text(String),
    Finish(Option<String>),
}

#[derive(Clone, Debug)]
pub struct ChatResult {
    pub text: String,
    pub finish_reason: Option<String>,
}

/// Raw upstream reply, relayed as-is by the model listing passthrough.
#[derive(Clone, Debug, Default)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("auth error: {0}")]
    Auth(String),
    #[error("rate limit: {0}")]
    RateLimit(String),
    #[error("network: {0}")]
    Network(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("store: {0}")]
    Store(String),
    #[error("other: {0}")]
    Other(String),
}

pub type ChatStream<'a> = Pin<Box<dyn Stream<Item = Result<ChatDelta, ChatError>> + Send + 'a>>;

/// Lazy, finite token producer. Consumed once; an `Err` item is always the last one.
pub type TokenStream<'a> = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send + 'a>>;

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn send_chat(&self, msgs: &[Message], opts: &ChatOpts) -> Result<ChatResult, ChatError>;

    async fn stream_chat<'a>(
        &'a self,
        msgs: Vec<Message>,
        opts: ChatOpts,
    ) -> Result<ChatStream<'a>, ChatError>;

    /// `GET {base}/models`. `authorization` replaces the configured credentials when set.
    async fn list_models(&self, authorization: Option<&str>) -> Result<UpstreamResponse, ChatError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input, in input order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ChatError>;
}

pub fn token_stream<'a, S>(s: S) -> TokenStream<'a>
where
    S: Stream<Item = Result<String, ChatError>> + Send + 'a,
{
    Box::pin(s)
}

/// Keeps only text deltas and stops at the first `Finish`.
pub fn text_tokens(stream: ChatStream<'_>) -> TokenStream<'_> {
    let s = async_stream::stream! {
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            match item {
                Ok(ChatDelta::Text(t)) => yield Ok(t),
                Ok(ChatDelta::Finish(_)) => break,
                Ok(ChatDelta::RoleStart(_)) => {}
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    };
    token_stream(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn role_serializes_lowercase() {
        let m = Message::user("hi");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["role"], "user");
        let back: Message =
            serde_json::from_str(r#"{"role":"assistant","content":"x"}"#).unwrap();
        assert_eq!(back, Message::assistant("x"));
    }

    #[test]
    fn unknown_role_is_rejected() {
        let r = serde_json::from_str::<Message>(r#"{"role":"tool","content":"x"}"#);
        assert!(r.is_err());
    }

    #[tokio::test]
    async fn text_tokens_drops_control_events_and_stops_at_finish() {
        let items: Vec<Result<ChatDelta, ChatError>> = vec![
            Ok(ChatDelta::RoleStart(Role::Assistant)),
            Ok(ChatDelta::Text("a".into())),
            Ok(ChatDelta::Text("b".into())),
            Ok(ChatDelta::Finish(Some("stop".into()))),
            Ok(ChatDelta::Text("late".into())),
        ];
        let out: Vec<String> = text_tokens(Box::pin(stream::iter(items)))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(out, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn text_tokens_ends_after_error() {
        let items: Vec<Result<ChatDelta, ChatError>> = vec![
            Ok(ChatDelta::Text("a".into())),
            Err(ChatError::Network("reset".into())),
            Ok(ChatDelta::Text("b".into())),
        ];
        let out: Vec<Result<String, ChatError>> =
            text_tokens(Box::pin(stream::iter(items))).collect().await;
        assert_eq!(out.len(), 2);
        assert!(matches!(out[1], Err(ChatError::Network(_))));
    }
}
