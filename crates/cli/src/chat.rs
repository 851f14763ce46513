use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args};
use docchat_core::llm::{ChatOpts, Message, ModelClient};
use docchat_core::qa::{RetrievalQa, DEFAULT_TOP_K};
use docchat_core::route::{AnswerMode, DEFAULT_MARKER};
use docchat_core::store::{VectorRetriever, VectorStore};
use docchat_core::{relay, ChatHistory, Route};
use futures::StreamExt;
use providers::openai::{OpenAiClient, OpenAiConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Vector store file, or a directory of store files
    #[arg(short = 'f', long = "store", default_value = "vectorstore.json")]
    pub store: PathBuf,

    /// Completion model (provider default when omitted)
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long, default_value_t = 0.5)]
    pub temperature: f32,

    /// Passages retrieved per question
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Ask the model to cite passage sources (`--with-sources false` to turn off)
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub with_sources: bool,

    /// Leading character that sends a question straight to the model
    #[arg(long, default_value_t = DEFAULT_MARKER)]
    pub marker: char,
}

/// One conversation: routes each question and remembers answered turns.
pub struct Session {
    client: Arc<dyn ModelClient>,
    qa: RetrievalQa,
    history: ChatHistory,
    marker: char,
    opts: ChatOpts,
}

impl Session {
    pub fn new(
        client: Arc<dyn ModelClient>,
        qa: RetrievalQa,
        marker: char,
        opts: ChatOpts,
    ) -> Self {
        Self {
            client,
            qa,
            history: ChatHistory::new(),
            marker,
            opts,
        }
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    /// Streams the answer into `out`, flushing after every token. The turn is
    /// recorded only when the whole answer arrived.
    pub async fn ask<W: Write>(&mut self, question: &str, out: &mut W) -> Result<String> {
        let mut messages = self.history.to_messages();
        messages.push(Message::user(question));
        let route = Route::resolve(messages, self.marker, AnswerMode::Retrieval)?;
        info!(target: "chat", route = route.label(), turns = self.history.len(), "question");

        let answer = {
            let mut tokens = match route {
                Route::Direct { messages } => {
                    relay::direct(self.client.as_ref(), messages, self.opts.clone())
                }
                Route::Retrieval { question, history } => {
                    self.qa.answer(question, history, self.opts.clone())
                }
            };
            let mut answer = String::new();
            while let Some(token) = tokens.next().await {
                let token = token?;
                out.write_all(token.as_bytes())?;
                out.flush()?;
                answer.push_str(&token);
            }
            answer
        };
        let asked = question.strip_prefix(self.marker).unwrap_or(question);
        self.history.push(asked, answer.clone());
        Ok(answer)
    }
}

pub async fn run(args: ChatArgs) -> Result<()> {
    let store = VectorStore::load(&args.store)
        .with_context(|| format!("loading vector store from {}", args.store.display()))?;
    info!(
        target: "chat",
        path = %args.store.display(),
        passages = store.len(),
        "vector store loaded"
    );

    let cfg = OpenAiConfig::from_env_and_file()?;
    let model = args.model.clone().unwrap_or_else(|| cfg.model.clone());
    let client = Arc::new(OpenAiClient::new(cfg)?);
    let retriever = Arc::new(VectorRetriever::new(Arc::new(store), client.clone()));
    let qa = RetrievalQa::new(client.clone(), retriever)
        .top_k(args.top_k)
        .with_sources(args.with_sources);
    let opts = ChatOpts::new(model).with_temperature(args.temperature);
    let mut session = Session::new(client, qa, args.marker, opts);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = io::stdout();
    loop {
        print!("You: ");
        stdout.flush()?;
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }

        print!("AI: ");
        stdout.flush()?;
        let outcome = tokio::select! {
            res = session.ask(question, &mut stdout) => Some(res),
            _ = tokio::signal::ctrl_c() => None,
        };
        match outcome {
            Some(Ok(_)) => println!("\n"),
            Some(Err(e)) => {
                error!(target: "chat", error = %e, "question failed");
                println!();
                eprintln!("error: {e:#}\n");
            }
            None => {
                println!();
                break;
            }
        }
    }
    info!(target: "chat", turns = session.history().len(), "session ended");
    Ok(())
}
