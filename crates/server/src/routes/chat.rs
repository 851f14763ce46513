//! `POST /v1/chat/completions`: always answers with an event stream.
//!
//! The handler only opens the stream; a spawned task parses the body,
//! resolves the route and drives the [`SseWriter`]. Whatever happens inside
//! that task, the last frame it writes is `[DONE]`.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use docchat_core::llm::{ChatOpts, TokenStream};
use docchat_core::{relay, Route};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, info_span, warn, Instrument};

use crate::schemas::ChatCompletionRequest;
use crate::state::AppState;
use crate::writer::{ClientGone, Finish, SseWriter, FRAME_BUFFER};

pub const DEFAULT_TEMPERATURE: f32 = 0.5;

/// Takes the raw body rather than `Bytes` so an oversized request is
/// reported inside the stream instead of as a bare 413.
pub async fn chat_completions(State(state): State<Arc<AppState>>, body: Body) -> Response {
    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    let span = info_span!("chat_completion");
    tokio::spawn(
        async move {
            let request = read_request(body, state.config.max_body_bytes).await;
            let model = request
                .as_ref()
                .ok()
                .map(|r| r.model.trim().to_string())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| state.model.clone());
            let writer = SseWriter::new(tx, model.clone());
            match respond(&state, request, model, writer).await {
                Ok(answer_len) => info!(answer_len, "response complete"),
                Err(ClientGone) => warn!("client disconnected mid-stream; request abandoned"),
            }
        }
        .instrument(span),
    );

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

async fn read_request(body: Body, limit: usize) -> Result<ChatCompletionRequest, String> {
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| format!("request body rejected (limit {limit} bytes): {e}"))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid request body: {e}"))
}

/// Returns the length of the relayed answer.
async fn respond(
    state: &AppState,
    request: Result<ChatCompletionRequest, String>,
    model: String,
    writer: SseWriter,
) -> Result<usize, ClientGone> {
    let req = match request {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "unusable request body");
            writer.write_done(Finish::Error(e)).await?;
            return Ok(0);
        }
    };
    let (marker, mode) = (state.config.direct_marker, state.config.mode);
    let route = match Route::resolve(req.messages, marker, mode) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "unroutable request");
            writer.write_done(Finish::Error(e.to_string())).await?;
            return Ok(0);
        }
    };

    let temperature = req.temperature.unwrap_or(DEFAULT_TEMPERATURE);
    let opts = ChatOpts::new(model).with_temperature(temperature);
    info!(route = route.label(), model = %opts.model, "relaying");
    let tokens = match route {
        Route::Direct { messages } => relay::direct(state.client.as_ref(), messages, opts),
        Route::Retrieval { question, history } => state.qa.answer(question, history, opts),
    };
    pump(tokens, writer).await
}

/// Copies tokens to the client in order and always finishes the writer.
async fn pump(mut tokens: TokenStream<'_>, mut writer: SseWriter) -> Result<usize, ClientGone> {
    let mut answer = String::new();
    while let Some(item) = tokens.next().await {
        match item {
            Ok(token) => {
                writer.write_chunk(&token).await?;
                answer.push_str(&token);
            }
            Err(e) => {
                error!(error = %e, tokens_sent = !answer.is_empty(), "answer failed");
                writer.write_done(Finish::Error(e.to_string())).await?;
                return Ok(answer.len());
            }
        }
    }
    writer.write_done(Finish::Stop).await?;
    Ok(answer.len())
}
