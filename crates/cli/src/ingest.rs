//! Offline ingestion: text files in, vector store out.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use docchat_core::llm::Embedder;
use docchat_core::splitter::RecursiveSplitter;
use docchat_core::store::{StoreEntry, VectorStore};
use providers::openai::{OpenAiClient, OpenAiConfig};
use tracing::{info, warn};
use walkdir::{DirEntry, WalkDir};

/// Passages per progress line; the client splits further by its own batch size.
const PROGRESS_BATCH: usize = 256;

/// `text-embedding-ada-002` list price per thousand tokens.
pub const DEFAULT_USD_PER_1K_TOKENS: f64 = 0.0001;

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// File or directory to ingest
    pub target: PathBuf,

    /// Store to create or extend
    #[arg(short, long, default_value = "vectorstore.json")]
    pub output: PathBuf,

    /// File extension to pick up (`*` for any)
    #[arg(short, long, default_value = "txt")]
    pub extension: String,

    #[arg(long, default_value_t = 1000)]
    pub chunk_size: usize,

    #[arg(long, default_value_t = 200)]
    pub chunk_overlap: usize,

    /// Embedding price used for the cost estimate
    #[arg(long, default_value_t = DEFAULT_USD_PER_1K_TOKENS)]
    pub usd_per_1k_tokens: f64,

    /// Only report what would be embedded
    #[arg(short, long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub source: String,
    pub text: String,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

fn wanted(path: &Path, extension: &str) -> bool {
    let ext = extension.trim_start_matches('.');
    ext == "*"
        || path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(ext))
            .unwrap_or(false)
}

/// Files under `target` with the wanted extension, sorted by path.
/// Dot-files and dot-directories are skipped; non-UTF-8 files are logged and skipped.
pub fn collect_documents(target: &Path, extension: &str) -> Result<Vec<(PathBuf, String)>> {
    if !target.exists() {
        bail!("{} does not exist", target.display());
    }
    let mut docs = Vec::new();
    for entry in WalkDir::new(target)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = entry.with_context(|| format!("walking {}", target.display()))?;
        if !entry.file_type().is_file() || !wanted(entry.path(), extension) {
            continue;
        }
        match fs::read_to_string(entry.path()) {
            Ok(text) => docs.push((entry.path().to_path_buf(), text)),
            Err(e) => warn!(
                target: "ingest",
                path = %entry.path().display(),
                error = %e,
                "skipping unreadable file"
            ),
        }
    }
    Ok(docs)
}

pub fn split_documents(docs: &[(PathBuf, String)], splitter: &RecursiveSplitter) -> Vec<Passage> {
    docs.iter()
        .flat_map(|(path, text)| {
            let source = path.display().to_string();
            splitter.split(text).into_iter().map(move |chunk| Passage {
                source: source.clone(),
                text: chunk,
            })
        })
        .collect()
}

/// Tokens the embedding service will bill for, counted with `cl100k_base`
/// (the `text-embedding-ada-002` encoding). Newlines count as spaces.
pub fn count_tokens(passages: &[Passage]) -> Result<usize> {
    let bpe = tiktoken_rs::cl100k_base()?;
    let text: String = passages.iter().map(|p| p.text.replace('\n', " ")).collect();
    Ok(bpe.encode_with_special_tokens(&text).len())
}

pub fn estimate_cost(tokens: usize, usd_per_1k_tokens: f64) -> f64 {
    tokens as f64 / 1000.0 * usd_per_1k_tokens
}

/// Embeds passages in order. Any failure aborts the run; nothing is written.
pub async fn embed_passages(
    embedder: &dyn Embedder,
    passages: Vec<Passage>,
) -> Result<Vec<StoreEntry>> {
    let total = passages.len();
    let mut entries = Vec::with_capacity(total);
    for batch in passages.chunks(PROGRESS_BATCH) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != batch.len() {
            bail!(
                "embedding service returned {} vectors for {} passages",
                vectors.len(),
                batch.len()
            );
        }
        for (p, vector) in batch.iter().zip(vectors) {
            entries.push(StoreEntry {
                text: p.text.clone(),
                source: Some(p.source.clone()),
                vector,
            });
        }
        info!(target: "ingest", done = entries.len(), total, "embedded batch");
    }
    Ok(entries)
}

/// Extends `existing` or starts a new store sized by the first vector.
pub fn build_store(
    existing: Option<VectorStore>,
    embedding_model: &str,
    entries: Vec<StoreEntry>,
) -> Result<VectorStore> {
    let mut store = match existing {
        Some(s) => {
            if s.embedding_model() != embedding_model {
                bail!(
                    "store was built with '{}', refusing to add '{}' embeddings",
                    s.embedding_model(),
                    embedding_model
                );
            }
            s
        }
        None => {
            let Some(first) = entries.first() else {
                bail!("no passages to store");
            };
            VectorStore::new(embedding_model, first.vector.len())
        }
    };
    store.add(entries)?;
    Ok(store)
}

pub async fn run(args: IngestArgs) -> Result<()> {
    if args.chunk_overlap >= args.chunk_size {
        bail!(
            "--chunk-overlap ({}) must be smaller than --chunk-size ({})",
            args.chunk_overlap,
            args.chunk_size
        );
    }
    let docs = collect_documents(&args.target, &args.extension)?;
    if docs.is_empty() {
        bail!("no .{} files found under {}", args.extension, args.target.display());
    }
    let splitter = RecursiveSplitter::new(args.chunk_size, args.chunk_overlap);
    let passages = split_documents(&docs, &splitter);
    if passages.is_empty() {
        bail!("matched files under {} contain no text", args.target.display());
    }
    let chars: usize = passages.iter().map(|p| p.text.chars().count()).sum();
    let tokens = count_tokens(&passages)?;
    let cost = estimate_cost(tokens, args.usd_per_1k_tokens);
    println!(
        "{} documents, {} chunks, {} characters",
        docs.len(),
        passages.len(),
        chars
    );
    println!("use {tokens} tokens");
    println!("price {cost} USD");
    info!(
        target: "ingest",
        documents = docs.len(),
        chunks = passages.len(),
        chars,
        tokens,
        cost,
        "split"
    );
    if args.dry_run {
        println!("dry run: nothing embedded, {} left untouched", args.output.display());
        return Ok(());
    }

    let existing = if args.output.is_file() {
        Some(
            VectorStore::load(&args.output)
                .with_context(|| format!("opening existing store {}", args.output.display()))?,
        )
    } else {
        None
    };

    let cfg = OpenAiConfig::from_env_and_file()?;
    let embedding_model = cfg.embedding_model.clone();
    let client = OpenAiClient::new(cfg)?;
    let entries = embed_passages(&client, passages).await?;
    let store = build_store(existing, &embedding_model, entries)?;
    store
        .save(&args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;
    println!("{} passages in {}", store.len(), args.output.display());
    info!(
        target: "ingest",
        path = %args.output.display(),
        passages = store.len(),
        "store saved"
    );
    Ok(())
}
