use std::sync::Arc;

use docchat_core::llm::ModelClient;
use docchat_core::qa::RetrievalQa;

use crate::config::Config;

/// Shared, read-only per-process state handed to every handler.
pub struct AppState {
    pub config: Arc<Config>,
    pub client: Arc<dyn ModelClient>,
    pub qa: Arc<RetrievalQa>,
    /// Model used when a request does not name one.
    pub model: String,
    /// Passages in the loaded store, reported by `/health`.
    pub passages: usize,
}
