//! Axum router construction.

mod chat;
mod health;
mod models;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub use chat::DEFAULT_TEMPERATURE;

/// Build the complete [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/models", get(models::list_models))
        .route("/health", get(health::get_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use docchat_core::chunk::CompletionChunk;
    use docchat_core::llm::{
        ChatDelta, ChatError, ChatOpts, ChatResult, ChatStream, Message, ModelClient,
        UpstreamResponse,
    };
    use docchat_core::qa::RetrievalQa;
    use docchat_core::store::{RetrievedPassage, Retriever};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::Config;

    #[derive(Default)]
    struct FakeClient {
        tokens: Vec<&'static str>,
        /// Fail the stream after this many tokens.
        fail_after: Option<usize>,
        refuse: bool,
        streamed: Mutex<Vec<(Vec<Message>, ChatOpts)>>,
        auth_seen: Mutex<Option<String>>,
    }

    #[async_trait]
    impl ModelClient for FakeClient {
        async fn send_chat(
            &self,
            _msgs: &[Message],
            _opts: &ChatOpts,
        ) -> Result<ChatResult, ChatError> {
            Ok(ChatResult {
                text: "standalone question".into(),
                finish_reason: Some("stop".into()),
            })
        }

        async fn stream_chat<'a>(
            &'a self,
            msgs: Vec<Message>,
            opts: ChatOpts,
        ) -> Result<ChatStream<'a>, ChatError> {
            self.streamed.lock().unwrap().push((msgs, opts));
            if self.refuse {
                return Err(ChatError::Network("connection refused".into()));
            }
            let mut items: Vec<Result<ChatDelta, ChatError>> = vec![Ok(ChatDelta::RoleStart(
                docchat_core::llm::Role::Assistant,
            ))];
            for (i, t) in self.tokens.iter().enumerate() {
                if self.fail_after == Some(i) {
                    items.push(Err(ChatError::Network("connection reset".into())));
                    return Ok(Box::pin(futures::stream::iter(items)));
                }
                items.push(Ok(ChatDelta::Text(t.to_string())));
            }
            items.push(Ok(ChatDelta::Finish(Some("stop".into()))));
            Ok(Box::pin(futures::stream::iter(items)))
        }

        async fn list_models(
            &self,
            authorization: Option<&str>,
        ) -> Result<UpstreamResponse, ChatError> {
            *self.auth_seen.lock().unwrap() = authorization.map(str::to_string);
            if self.refuse {
                return Err(ChatError::Network("connection refused".into()));
            }
            Ok(UpstreamResponse {
                status: 200,
                headers: vec![
                    ("content-type".into(), "application/json".into()),
                    ("transfer-encoding".into(), "chunked".into()),
                    ("x-request-id".into(), "req-1".into()),
                ],
                body: br#"{"object":"list","data":[{"id":"gpt-3.5-turbo"}]}"#.to_vec(),
            })
        }
    }

    struct FakeRetriever;

    #[async_trait]
    impl Retriever for FakeRetriever {
        async fn search(
            &self,
            _query: &str,
            _k: usize,
        ) -> Result<Vec<RetrievedPassage>, ChatError> {
            Ok(vec![RetrievedPassage {
                text: "The office opens at nine.".into(),
                source: Some("handbook.txt".into()),
                score: 0.8,
            }])
        }
    }

    fn app(client: Arc<FakeClient>) -> Router {
        app_with(client, Config::from_lookup(|_: &str| None).unwrap())
    }

    fn app_with(client: Arc<FakeClient>, config: Config) -> Router {
        let qa = RetrievalQa::new(client.clone(), Arc::new(FakeRetriever));
        build(Arc::new(AppState {
            config: Arc::new(config),
            client,
            qa: Arc::new(qa),
            model: "gpt-3.5-turbo".into(),
            passages: 3,
        }))
    }

    async fn post_chat(app: Router, body: &str) -> (StatusCode, Vec<String>) {
        let resp = app
            .oneshot(
                Request::post("/v1/chat/completions")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-cache");
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let frames = text
            .split_inclusive("\n\n")
            .map(str::to_string)
            .collect::<Vec<_>>();
        (status, frames)
    }

    fn chunks(frames: &[String]) -> Vec<CompletionChunk> {
        frames
            .iter()
            .filter(|f| f.as_str() != "data: [DONE]\n\n")
            .map(|f| serde_json::from_str(f.trim_start_matches("data: ").trim_end()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn marked_question_goes_straight_to_the_model() {
        let client = Arc::new(FakeClient {
            tokens: vec!["Hel", "lo", "!"],
            ..Default::default()
        });
        let (status, frames) = post_chat(
            app(client.clone()),
            r#"{"model":"gpt-4o","messages":[{"role":"system","content":"be brief"},{"role":"user","content":"!say hello"}]}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");
        let chunks = chunks(&frames);
        let text: String = chunks.iter().map(|c| c.content()).collect();
        assert_eq!(text, "Hello!");
        let last = chunks.last().unwrap();
        assert_eq!(last.content(), "");
        assert_eq!(last.choices[0].finish_reason.as_deref(), Some("stop"));
        assert!(chunks.iter().all(|c| c.model == "gpt-4o"));

        let streamed = client.streamed.lock().unwrap();
        let (msgs, opts) = &streamed[0];
        assert_eq!(msgs, &vec![Message::system("be brief"), Message::user("say hello")]);
        assert_eq!(opts.temperature, Some(DEFAULT_TEMPERATURE));
    }

    #[tokio::test]
    async fn unmarked_question_is_answered_from_the_store() {
        let client = Arc::new(FakeClient {
            tokens: vec!["At ", "nine."],
            ..Default::default()
        });
        let (_, frames) = post_chat(
            app(client.clone()),
            r#"{"messages":[{"role":"user","content":"When does the office open?"}],"temperature":0.1}"#,
        )
        .await;

        let text: String = chunks(&frames).iter().map(|c| c.content().to_string()).collect();
        assert_eq!(text, "At nine.");
        let streamed = client.streamed.lock().unwrap();
        let (msgs, opts) = &streamed[0];
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].content.contains("The office opens at nine."));
        assert!(msgs[0].content.contains("When does the office open?"));
        assert_eq!(opts.model, "gpt-3.5-turbo");
        assert_eq!(opts.temperature, Some(0.1));
    }

    #[tokio::test]
    async fn upstream_refusal_is_one_error_chunk_then_done() {
        let client = Arc::new(FakeClient {
            refuse: true,
            ..Default::default()
        });
        let (status, frames) = post_chat(
            app(client),
            r#"{"messages":[{"role":"user","content":"!hi"}]}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(frames.len(), 2);
        assert!(chunks(&frames)[0].content().contains("connection refused"));
        assert_eq!(frames[1], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_sent_tokens_and_ends_with_done() {
        let client = Arc::new(FakeClient {
            tokens: vec!["one ", "two ", "three"],
            fail_after: Some(2),
            ..Default::default()
        });
        let (_, frames) = post_chat(
            app(client),
            r#"{"messages":[{"role":"user","content":"!count"}]}"#,
        )
        .await;

        let chunks = chunks(&frames);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content(), "one ");
        assert_eq!(chunks[1].content(), "two ");
        assert!(chunks[2].content().contains("connection reset"));
        assert!(chunks.iter().all(|c| c.choices[0].finish_reason.is_none()));
        assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn malformed_body_still_streams_done() {
        let client = Arc::new(FakeClient::default());
        let (status, frames) = post_chat(app(client.clone()), "{not json").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(frames.len(), 2);
        assert!(chunks(&frames)[0].content().starts_with("invalid request body"));
        assert!(client.streamed.lock().unwrap().is_empty());
    }

    fn big_direct_request(len: usize) -> String {
        format!(
            r#"{{"messages":[{{"role":"user","content":"!{}"}}]}}"#,
            "x".repeat(len)
        )
    }

    #[tokio::test]
    async fn bodies_over_two_mebibytes_are_streamed() {
        let client = Arc::new(FakeClient {
            tokens: vec!["long", " read"],
            ..Default::default()
        });
        let body = big_direct_request(3 * 1024 * 1024);
        let (status, frames) = post_chat(app(client.clone()), &body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");
        let text: String = chunks(&frames).iter().map(|c| c.content().to_string()).collect();
        assert_eq!(text, "long read");
        let streamed = client.streamed.lock().unwrap();
        assert_eq!(streamed[0].0[0].content.len(), 3 * 1024 * 1024);
    }

    #[tokio::test]
    async fn body_over_configured_limit_is_an_error_chunk() {
        let client = Arc::new(FakeClient::default());
        let mut config = Config::from_lookup(|_: &str| None).unwrap();
        config.max_body_bytes = 1024;
        let app = app_with(client.clone(), config);
        let (status, frames) = post_chat(app, &big_direct_request(4096)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(frames.len(), 2);
        assert!(chunks(&frames)[0].content().starts_with("request body rejected"));
        assert_eq!(frames[1], "data: [DONE]\n\n");
        assert!(client.streamed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_conversation_is_reported_in_stream() {
        let app = app(Arc::new(FakeClient::default()));
        let (_, frames) = post_chat(app, r#"{"messages":[]}"#).await;
        assert_eq!(frames.len(), 2);
        assert_eq!(chunks(&frames)[0].content(), "request has no messages");
    }

    #[tokio::test]
    async fn models_are_passed_through() {
        let client = Arc::new(FakeClient::default());
        let resp = app(client.clone())
            .oneshot(
                Request::get("/v1/models")
                    .header(header::AUTHORIZATION, "Bearer sk-client")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-request-id"], "req-1");
        assert!(resp.headers().get(header::TRANSFER_ENCODING).is_none());
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["data"][0]["id"], "gpt-3.5-turbo");
        assert_eq!(client.auth_seen.lock().unwrap().as_deref(), Some("Bearer sk-client"));
    }

    #[tokio::test]
    async fn unreachable_models_upstream_is_bad_gateway() {
        let client = Arc::new(FakeClient {
            refuse: true,
            ..Default::default()
        });
        let resp = app(client)
            .oneshot(Request::get("/v1/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn health_reports_store_size() {
        let resp = app(Arc::new(FakeClient::default()))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v, serde_json::json!({"status": "ok", "passages": 3}));
    }
}
