//! Persisted similarity-search store.
//!
//! A store is a JSON document holding text passages and their embedding
//! vectors. It is produced offline by `docchat ingest` and opened read-only
//! by the chat front ends; search is exhaustive cosine similarity.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::llm::{ChatError, Embedder};

pub const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store not found: {0}")]
    NotFound(PathBuf),
    #[error("no store files in directory: {0}")]
    Empty(PathBuf),
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported store version {0}")]
    Version(u32),
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding model mismatch: store uses '{expected}', got '{actual}'")]
    ModelMismatch { expected: String, actual: String },
    #[error("vector for passage {0} contains NaN or infinite values")]
    InvalidVector(usize),
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        ChatError::Store(e.to_string())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StoreEntry {
    pub text: String,
    #[serde(default)]
    pub source: Option<String>,
    pub vector: Vec<f32>,
}

/// A passage returned by a search, best match first.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrievedPassage {
    pub text: String,
    pub source: Option<String>,
    pub score: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    embedding_model: String,
    dimensions: usize,
    entries: Vec<StoreEntry>,
}

#[derive(Clone, Debug)]
pub struct VectorStore {
    embedding_model: String,
    dimensions: usize,
    entries: Vec<StoreEntry>,
    norms: Vec<f32>,
}

impl VectorStore {
    pub fn new<S: Into<String>>(embedding_model: S, dimensions: usize) -> Self {
        Self {
            embedding_model: embedding_model.into(),
            dimensions,
            entries: Vec::new(),
            norms: Vec::new(),
        }
    }

    /// Opens a store file, or merges every `*.json` store directly inside a directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        if !path.is_dir() {
            let store = Self::load_file(path)?;
            info!(target: "store", path = %path.display(), passages = store.len(), "store loaded");
            return Ok(store);
        }

        let rd = fs::read_dir(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut files: Vec<PathBuf> = rd
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|x| x == "json"))
            .collect();
        files.sort();

        let mut merged: Option<VectorStore> = None;
        for f in files {
            let part = Self::load_file(&f)?;
            debug!(
                target: "store",
                path = %f.display(),
                passages = part.len(),
                "store part loaded"
            );
            match merged.as_mut() {
                None => merged = Some(part),
                Some(m) => m.merge(part)?,
            }
        }
        let store = merged.ok_or_else(|| StoreError::Empty(path.to_path_buf()))?;
        info!(
            target: "store",
            path = %path.display(),
            passages = store.len(),
            "store directory loaded"
        );
        Ok(store)
    }

    fn load_file(path: &Path) -> Result<Self, StoreError> {
        let data = fs::read(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: StoreFile = serde_json::from_slice(&data).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if file.version != STORE_FORMAT_VERSION {
            return Err(StoreError::Version(file.version));
        }
        let mut store = Self::new(file.embedding_model, file.dimensions);
        store.add(file.entries)?;
        Ok(store)
    }

    /// Writes the store through a temporary file so readers never see a partial file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = StoreFile {
            version: STORE_FORMAT_VERSION,
            embedding_model: self.embedding_model.clone(),
            dimensions: self.dimensions,
            entries: self.entries.clone(),
        };
        let data = serde_json::to_vec(&file).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let mut tmp = path.to_path_buf();
        tmp.set_extension("json.tmp");
        {
            let mut f = fs::File::create(&tmp).map_err(io_err)?;
            f.write_all(&data).map_err(io_err)?;
            f.flush().map_err(io_err)?;
        }
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    pub fn add(&mut self, entries: Vec<StoreEntry>) -> Result<(), StoreError> {
        for (i, e) in entries.iter().enumerate() {
            if e.vector.len() != self.dimensions {
                return Err(StoreError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: e.vector.len(),
                });
            }
            if e.vector.iter().any(|v| !v.is_finite()) {
                return Err(StoreError::InvalidVector(self.entries.len() + i));
            }
        }
        for e in entries {
            self.norms.push(magnitude(&e.vector));
            self.entries.push(e);
        }
        Ok(())
    }

    fn merge(&mut self, other: VectorStore) -> Result<(), StoreError> {
        if other.dimensions != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: other.dimensions,
            });
        }
        if other.embedding_model != self.embedding_model {
            return Err(StoreError::ModelMismatch {
                expected: self.embedding_model.clone(),
                actual: other.embedding_model,
            });
        }
        self.add(other.entries)
    }

    /// Top `k` passages by cosine similarity. Equal scores keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedPassage>, StoreError> {
        if query.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        let qn = magnitude(query);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(i, (e, n))| (i, cosine_similarity(query, &e.vector, qn, *n)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        Ok(scored
            .into_iter()
            .map(|(i, score)| RetrievedPassage {
                text: self.entries[i].text.clone(),
                source: self.entries[i].source.clone(),
                score,
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }
}

fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine_similarity(a: &[f32], b: &[f32], mag_a: f32, mag_b: f32) -> f32 {
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (mag_a * mag_b)
}

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>, ChatError>;
}

/// Embeds the query, then searches a shared read-only store.
pub struct VectorRetriever {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl VectorRetriever {
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>, ChatError> {
        let mut vectors = self.embedder.embed(&[query.to_string()]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| ChatError::Decode("embedding response was empty".into()))?;
        Ok(self.store.search(&vector, k)?)
    }
}
