use crate::openai::config::OpenAiConfig;
use async_trait::async_trait;
use bytes::Buf;
use docchat_core::llm::{
    ChatDelta, ChatError, ChatOpts, ChatResult, ChatStream, Embedder, Message, ModelClient, Role,
    UpstreamResponse,
};
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use tokio::time::Duration;
use tracing::{debug, error, info};

/// OpenAI-compatible HTTP client. Every call is attempted exactly once.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    cfg: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(cfg: OpenAiConfig) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", cfg.api_key))?,
        );
        let mut builder = Client::builder()
            .default_headers(headers)
            .use_rustls_tls()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .connect_timeout(cfg.connect_timeout);
        if let Some(p) = &cfg.proxy {
            builder = builder.proxy(reqwest::Proxy::all(p)?);
        }
        let http = builder.build()?;
        Ok(Self { http, cfg })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.cfg
    }

    fn map_messages(&self, msgs: &[Message]) -> Vec<serde_json::Value> {
        msgs.iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect()
    }

    fn chat_body(&self, msgs: &[Message], opts: &ChatOpts, stream: bool) -> serde_json::Value {
        let model = if opts.model.trim().is_empty() {
            self.cfg.model.as_str()
        } else {
            opts.model.as_str()
        };
        let mut body = serde_json::json!({
            "model": model,
            "messages": self.map_messages(msgs),
            "stream": stream,
        });
        if let Some(map) = body.as_object_mut() {
            if let Some(t) = opts.temperature {
                map.insert("temperature".into(), serde_json::json!(t));
            }
            if let Some(p) = opts.top_p {
                map.insert("top_p".into(), serde_json::json!(p));
            }
            if let Some(n) = opts.max_tokens {
                map.insert("max_tokens".into(), serde_json::json!(n));
            }
        }
        body
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ChatError> {
        let body = serde_json::json!({
            "model": self.cfg.embedding_model,
            "input": inputs,
        });
        let resp = self
            .http
            .post(self.cfg.endpoint("embeddings"))
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.ok();
            error!(
                target: "providers::openai",
                "embeddings non-200 status={} body={:?}",
                status,
                body
            );
            return Err(map_status_err(status, body));
        }
        let bytes = resp.bytes().await.map_err(map_reqwest_err)?;
        parse_embeddings(&bytes, inputs.len())
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn send_chat(&self, msgs: &[Message], opts: &ChatOpts) -> Result<ChatResult, ChatError> {
        let body = self.chat_body(msgs, opts, false);
        let resp = self
            .http
            .post(self.cfg.endpoint("chat/completions"))
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if !resp.status().is_success() {
            return Err(map_status_err(resp.status(), resp.text().await.ok()));
        }
        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))?;
        let text = v["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        let finish_reason = v["choices"][0]["finish_reason"].as_str().map(str::to_string);
        Ok(ChatResult {
            text,
            finish_reason,
        })
    }

    async fn stream_chat<'a>(
        &'a self,
        msgs: Vec<Message>,
        opts: ChatOpts,
    ) -> Result<ChatStream<'a>, ChatError> {
        let url = self.cfg.endpoint("chat/completions");
        info!(target:"providers::openai","start chat stream model={} url={}", opts.model, url);
        let body = self.chat_body(&msgs, &opts, true);
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.ok();
            error!(
                target: "providers::openai",
                "chat stream non-200 status={} body={:?}",
                status,
                body
            );
            return Err(map_status_err(status, body));
        }
        let mut stream = resp.bytes_stream();
        let s = async_stream::stream! {
            let mut buf = bytes::BytesMut::new();
            'outer: while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(b) => {
                        buf.extend_from_slice(&b);
                        while let Some((pos, sep_len)) = find_event_boundary(&buf) {
                            let ev = buf.split_to(pos).freeze();
                            buf.advance(sep_len);
                            match parse_chat_sse_event(&ev) {
                                Ok(Some(ChatDelta::Finish(r))) => {
                                    yield Ok(ChatDelta::Finish(r));
                                    break 'outer;
                                }
                                Ok(Some(delta)) => yield Ok(delta),
                                Ok(None) => {}
                                Err(e) => {
                                    yield Err(e);
                                    break 'outer;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(map_reqwest_err(e));
                        break 'outer;
                    }
                }
            }
            debug!(target:"providers::openai","chat stream closed");
        };
        Ok(Box::pin(s))
    }

    async fn list_models(
        &self,
        authorization: Option<&str>,
    ) -> Result<UpstreamResponse, ChatError> {
        let mut req = self.http.get(self.cfg.endpoint("models"));
        if let Some(auth) = authorization {
            req = req.header(header::AUTHORIZATION, auth);
        }
        let resp = req.send().await.map_err(map_reqwest_err)?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = resp.bytes().await.map_err(map_reqwest_err)?.to_vec();
        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ChatError> {
        let mut out = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(self.cfg.embed_batch_size.max(1)) {
            debug!(target:"providers::openai","embedding batch size={}", batch.len());
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

fn parse_embeddings(body: &[u8], expected: usize) -> Result<Vec<Vec<f32>>, ChatError> {
    let mut resp: EmbeddingResponse =
        serde_json::from_slice(body).map_err(|e| ChatError::Decode(e.to_string()))?;
    if resp.data.len() != expected {
        return Err(ChatError::Protocol(format!(
            "expected {} embeddings, got {}",
            expected,
            resp.data.len()
        )));
    }
    resp.data.sort_by_key(|d| d.index);
    Ok(resp.data.into_iter().map(|d| d.embedding).collect())
}

fn map_reqwest_err(e: reqwest::Error) -> ChatError {
    if e.is_timeout() || e.is_request() || e.is_connect() {
        ChatError::Network(e.to_string())
    } else if e.is_decode() || e.is_body() {
        ChatError::Decode(e.to_string())
    } else {
        ChatError::Other(e.to_string())
    }
}

fn map_status_err(status: StatusCode, body: Option<String>) -> ChatError {
    let s = format!("{} {}", status.as_u16(), body.unwrap_or_default());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatError::Auth(s),
        StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimit(s),
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => ChatError::Network(s),
        StatusCode::NOT_FOUND => ChatError::Protocol(s),
        _ => ChatError::Other(s),
    }
}

/// Position of the first blank line and its length in bytes.
fn find_event_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = twoway::find_bytes(buf, b"\r\n\r\n").map(|p| (p, 4));
    let lf = twoway::find_bytes(buf, b"\n\n").map(|p| (p, 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_chat_sse_event(ev: &[u8]) -> Result<Option<ChatDelta>, ChatError> {
    let s = std::str::from_utf8(ev).map_err(|e| ChatError::Decode(e.to_string()))?;
    let mut data_lines = Vec::new();
    for line in s.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }
    if data_lines.is_empty() {
        return Ok(None);
    }
    if data_lines.len() == 1 && data_lines[0].trim_end() == "[DONE]" {
        return Ok(Some(ChatDelta::Finish(None)));
    }
    let json_text = data_lines.join("\n");
    let v: serde_json::Value =
        serde_json::from_str(&json_text).map_err(|e| ChatError::Decode(e.to_string()))?;
    if let Some(msg) = v["error"]["message"].as_str() {
        return Err(ChatError::Protocol(msg.to_string()));
    }
    if let Some(content) = v["choices"][0]["delta"]["content"].as_str() {
        if !content.is_empty() {
            return Ok(Some(ChatDelta::Text(content.to_string())));
        }
    }
    if let Some(fr) = v["choices"][0]["finish_reason"].as_str() {
        return Ok(Some(ChatDelta::Finish(Some(fr.to_string()))));
    }
    if let Some(role) = v["choices"][0]["delta"]["role"].as_str() {
        let r = match role {
            "user" => Role::User,
            "system" => Role::System,
            _ => Role::Assistant,
        };
        return Ok(Some(ChatDelta::RoleStart(r)));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_delta() {
        let ev = br#"data: {"choices":[{"delta":{"content":"Hel"},"index":0,"finish_reason":null}]}"#;
        assert_eq!(
            parse_chat_sse_event(ev).unwrap(),
            Some(ChatDelta::Text("Hel".into()))
        );
    }

    #[test]
    fn role_only_first_chunk_is_role_start() {
        let ev = br#"data: {"choices":[{"delta":{"role":"assistant","content":""},"index":0}]}"#;
        assert_eq!(
            parse_chat_sse_event(ev).unwrap(),
            Some(ChatDelta::RoleStart(Role::Assistant))
        );
    }

    #[test]
    fn finish_reason_and_done_end_the_stream() {
        let ev = br#"data: {"choices":[{"delta":{},"index":0,"finish_reason":"stop"}]}"#;
        assert_eq!(
            parse_chat_sse_event(ev).unwrap(),
            Some(ChatDelta::Finish(Some("stop".into())))
        );
        assert_eq!(
            parse_chat_sse_event(b"data: [DONE]").unwrap(),
            Some(ChatDelta::Finish(None))
        );
    }

    #[test]
    fn comments_and_keepalives_are_skipped() {
        assert_eq!(parse_chat_sse_event(b": ping").unwrap(), None);
    }

    #[test]
    fn upstream_error_payload_is_protocol_error() {
        let ev = br#"data: {"error":{"message":"model overloaded"}}"#;
        assert!(matches!(
            parse_chat_sse_event(ev),
            Err(ChatError::Protocol(m)) if m == "model overloaded"
        ));
    }

    #[test]
    fn boundary_prefers_earliest_separator() {
        assert_eq!(find_event_boundary(b"data: a\n\ndata: b\r\n\r\n"), Some((7, 2)));
        assert_eq!(find_event_boundary(b"data: a\r\n\r\n"), Some((7, 4)));
        assert_eq!(find_event_boundary(b"data: partial"), None);
    }

    #[test]
    fn embeddings_are_reordered_by_index() {
        let body = br#"{"data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}]}"#;
        let v = parse_embeddings(body, 2).unwrap();
        assert_eq!(v, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(matches!(parse_embeddings(body, 3), Err(ChatError::Protocol(_))));
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            map_status_err(StatusCode::UNAUTHORIZED, None),
            ChatError::Auth(_)
        ));
        assert!(matches!(
            map_status_err(StatusCode::TOO_MANY_REQUESTS, Some("slow down".into())),
            ChatError::RateLimit(m) if m == "429 slow down"
        ));
    }

    #[test]
    fn body_omits_unset_options_and_defaults_model() {
        let client = OpenAiClient::new(OpenAiConfig::new("sk-test")).unwrap();
        let body = client.chat_body(&[Message::user("hi")], &ChatOpts::new(""), true);
        assert_eq!(body["model"], crate::openai::config::DEFAULT_MODEL);
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body.get("temperature").is_none());
        let body = client.chat_body(&[], &ChatOpts::new("m").with_temperature(0.5), false);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["stream"], false);
    }
}
