use futures::StreamExt;
use tracing::info;

use crate::llm::{self, ChatOpts, Message, ModelClient, TokenStream};

/// Sends `messages` to the completion service as-is and re-emits every token
/// the moment it arrives.
pub fn direct<'a>(
    client: &'a dyn ModelClient,
    messages: Vec<Message>,
    opts: ChatOpts,
) -> TokenStream<'a> {
    let s = async_stream::try_stream! {
        info!(target: "relay", model = %opts.model, messages = messages.len(), "direct relay");
        let upstream = client.stream_chat(messages, opts).await?;
        let mut tokens = llm::text_tokens(upstream);
        while let Some(t) = tokens.next().await {
            yield t?;
        }
    };
    llm::token_stream(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatDelta, ChatError, ChatResult, ChatStream, UpstreamResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EchoClient {
        seen: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl ModelClient for EchoClient {
        async fn send_chat(
            &self,
            _msgs: &[Message],
            _opts: &ChatOpts,
        ) -> Result<ChatResult, ChatError> {
            Err(ChatError::Other("not used".into()))
        }

        async fn stream_chat<'a>(
            &'a self,
            msgs: Vec<Message>,
            _opts: ChatOpts,
        ) -> Result<ChatStream<'a>, ChatError> {
            let last = msgs.last().map(|m| m.content.clone()).unwrap_or_default();
            *self.seen.lock().unwrap() = msgs;
            let items: Vec<Result<ChatDelta, ChatError>> = last
                .split_inclusive(' ')
                .map(|w| Ok(ChatDelta::Text(w.to_string())))
                .chain(std::iter::once(Ok(ChatDelta::Finish(Some("stop".into())))))
                .collect();
            Ok(Box::pin(futures::stream::iter(items)))
        }

        async fn list_models(&self, _auth: Option<&str>) -> Result<UpstreamResponse, ChatError> {
            Ok(UpstreamResponse::default())
        }
    }

    #[tokio::test]
    async fn forwards_messages_and_passes_tokens_through() {
        let client = EchoClient {
            seen: Mutex::new(Vec::new()),
        };
        let msgs = vec![Message::system("s"), Message::user("say it back")];
        let out: Vec<String> = direct(&client, msgs.clone(), ChatOpts::new("m"))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(out, vec!["say ", "it ", "back"]);
        assert_eq!(*client.seen.lock().unwrap(), msgs);
    }
}
