//! Streaming Response Writer.
//!
//! Frames go through a bounded channel whose receiving half is the HTTP
//! response body, so each write waits until the previous frame has been
//! handed to the socket. A closed channel means the client went away.

use std::convert::Infallible;

use bytes::Bytes;
use chrono::Utc;
use docchat_core::chunk::{sse_frame, CompletionChunk, DONE_FRAME};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

/// Frames buffered between the relay task and the response body.
pub const FRAME_BUFFER: usize = 16;

pub type Frame = Result<Bytes, Infallible>;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("client disconnected")]
pub struct ClientGone;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterState {
    Idle,
    Streaming,
    Done,
}

/// How a response ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Finish {
    /// Blank-content chunk with `finish_reason: "stop"`.
    Stop,
    /// One chunk carrying the error text.
    Error(String),
}

/// Single-use, scoped to one request. `write_done` consumes it.
pub struct SseWriter {
    tx: mpsc::Sender<Frame>,
    id: String,
    model: String,
    state: WriterState,
}

impl SseWriter {
    pub fn new<M: Into<String>>(tx: mpsc::Sender<Frame>, model: M) -> Self {
        Self {
            tx,
            id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
            model: model.into(),
            state: WriterState::Idle,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub async fn write_chunk(&mut self, token: &str) -> Result<(), ClientGone> {
        let chunk = CompletionChunk::token(&self.id, &self.model, Utc::now().timestamp(), token);
        self.send(sse_frame(&chunk)).await?;
        self.state = WriterState::Streaming;
        Ok(())
    }

    /// Writes the closing chunk and the `[DONE]` sentinel.
    pub async fn write_done(mut self, finish: Finish) -> Result<(), ClientGone> {
        let now = Utc::now().timestamp();
        let last = match &finish {
            Finish::Stop => CompletionChunk::stop(&self.id, &self.model, now),
            Finish::Error(text) => CompletionChunk::token(&self.id, &self.model, now, text),
        };
        let sent = self.send(sse_frame(&last)).await;
        self.state = WriterState::Done;
        sent?;
        self.send(DONE_FRAME.to_string()).await
    }

    async fn send(&self, frame: String) -> Result<(), ClientGone> {
        trace!(target: "writer", id = %self.id, len = frame.len(), "frame");
        self.tx
            .send(Ok(Bytes::from(frame)))
            .await
            .map_err(|_| ClientGone)
    }
}
