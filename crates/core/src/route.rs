use std::str::FromStr;

use thiserror::Error;

use crate::history::ChatHistory;
use crate::llm::{Message, Role};

pub const DEFAULT_MARKER: char = '!';

/// What to do with a question that carries no marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AnswerMode {
    #[default]
    Retrieval,
    Direct,
}

impl FromStr for AnswerMode {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retrieval" | "qa" => Ok(AnswerMode::Retrieval),
            "direct" | "chat" => Ok(AnswerMode::Direct),
            other => Err(RouteError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RouteError {
    #[error("request has no messages")]
    NoMessages,
    #[error("unknown answer mode '{0}' (expected retrieval or direct)")]
    UnknownMode(String),
}

/// How one request is answered. Resolved once, before any upstream call.
#[derive(Clone, Debug, PartialEq)]
pub enum Route {
    /// Forward the conversation to the completion service unchanged.
    Direct { messages: Vec<Message> },
    /// Answer the last message from the document store.
    Retrieval {
        question: String,
        history: ChatHistory,
    },
}

impl Route {
    pub fn resolve(
        mut messages: Vec<Message>,
        marker: char,
        default_mode: AnswerMode,
    ) -> Result<Route, RouteError> {
        let Some(last) = messages.last_mut() else {
            return Err(RouteError::NoMessages);
        };
        if last.role == Role::User {
            if let Some(rest) = last.content.strip_prefix(marker) {
                last.content = rest.to_string();
                return Ok(Route::Direct { messages });
            }
        }
        if default_mode == AnswerMode::Direct {
            return Ok(Route::Direct { messages });
        }
        let question = messages.pop().map(|m| m.content).unwrap_or_default();
        let history = ChatHistory::from_messages(&messages);
        Ok(Route::Retrieval { question, history })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Route::Direct { .. } => "direct",
            Route::Retrieval { .. } => "retrieval",
        }
    }
}
