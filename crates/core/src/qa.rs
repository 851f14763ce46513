//! Retrieval-augmented answering over a document store.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info};

use crate::history::ChatHistory;
use crate::llm::{self, ChatOpts, Message, ModelClient, TokenStream};
use crate::store::{RetrievedPassage, Retriever};

pub const DEFAULT_TOP_K: usize = 4;

const CONDENSE_TEMPLATE: &str = "Given the following conversation and a follow up question, \
rephrase the follow up question to be a standalone question.\n\n\
Chat History:\n{chat_history}\n\
Follow Up Input: {question}\n\
Standalone question:";

const QA_TEMPLATE: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n\
{context}\n\n\
Question: {question}\n\
Helpful Answer:";

const QA_WITH_SOURCES_TEMPLATE: &str = "Given the following extracted parts of a long document and a question, \
create a final answer with references (\"SOURCES\"). \
If you don't know the answer, just say that you don't know. Don't try to make up an answer. \
ALWAYS return a \"SOURCES\" part in your answer.\n\n\
QUESTION: {question}\n\
=========\n\
{context}\n\
=========\n\
FINAL ANSWER:";

pub struct RetrievalQa {
    client: Arc<dyn ModelClient>,
    retriever: Arc<dyn Retriever>,
    top_k: usize,
    with_sources: bool,
}

impl RetrievalQa {
    pub fn new(client: Arc<dyn ModelClient>, retriever: Arc<dyn Retriever>) -> Self {
        Self {
            client,
            retriever,
            top_k: DEFAULT_TOP_K,
            with_sources: false,
        }
    }

    pub fn top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    pub fn with_sources(mut self, on: bool) -> Self {
        self.with_sources = on;
        self
    }

    /// Condenses the question against `history`, retrieves passages and
    /// streams the completion. Nothing runs until the stream is polled.
    pub fn answer(
        &self,
        question: String,
        history: ChatHistory,
        opts: ChatOpts,
    ) -> TokenStream<'_> {
        let s = async_stream::try_stream! {
            let standalone = if history.is_empty() {
                question
            } else {
                self.condense(&question, &history, &opts).await?
            };
            let passages = self.retriever.search(&standalone, self.top_k).await?;
            info!(
                target: "qa",
                passages = passages.len(),
                question_len = standalone.len(),
                "retrieved context"
            );
            let prompt = self.compose(&standalone, &passages);
            let upstream = self.client.stream_chat(vec![Message::user(prompt)], opts).await?;
            let mut tokens = llm::text_tokens(upstream);
            while let Some(t) = tokens.next().await {
                yield t?;
            }
        };
        llm::token_stream(s)
    }

    async fn condense(
        &self,
        question: &str,
        history: &ChatHistory,
        opts: &ChatOpts,
    ) -> Result<String, llm::ChatError> {
        let transcript = history.transcript();
        let prompt = render(
            CONDENSE_TEMPLATE,
            &[("chat_history", &transcript), ("question", question)],
        );
        let condense_opts = ChatOpts::new(opts.model.clone()).with_temperature(0.0);
        let res = self
            .client
            .send_chat(&[Message::user(prompt)], &condense_opts)
            .await?;
        let standalone = res.text.trim().to_string();
        debug!(target: "qa", turns = history.len(), standalone = %standalone, "condensed question");
        if standalone.is_empty() {
            return Ok(question.to_string());
        }
        Ok(standalone)
    }

    fn compose(&self, question: &str, passages: &[RetrievedPassage]) -> String {
        if self.with_sources {
            let context = passages
                .iter()
                .map(|p| {
                    format!(
                        "Content: {}\nSource: {}",
                        p.text,
                        p.source.as_deref().unwrap_or("unknown")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n");
            render(
                QA_WITH_SOURCES_TEMPLATE,
                &[("question", question), ("context", &context)],
            )
        } else {
            let context = passages
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            render(QA_TEMPLATE, &[("context", &context), ("question", question)])
        }
    }
}

/// Fills `{name}` placeholders in a single pass over `template`. Inserted
/// values are copied verbatim and never scanned for further placeholders.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let extra: usize = vars.iter().map(|(_, v)| v.len()).sum();
    let mut out = String::with_capacity(template.len() + extra);
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let hit = vars
            .iter()
            .find(|(name, _)| tail.starts_with(name) && tail[name.len()..].starts_with('}'));
        match hit {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}
