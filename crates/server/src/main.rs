//! docchat-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise tracing.
//! 3. Load the vector store (fatal if missing or unreadable).
//! 4. Build the provider client and the retrieval chain.
//! 5. Serve HTTP with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use docchat_core::qa::RetrievalQa;
use docchat_core::store::{VectorRetriever, VectorStore};
use docchat_server::config::Config;
use docchat_server::routes;
use docchat_server::state::AppState;
use providers::openai::{OpenAiClient, OpenAiConfig};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;

    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: DOCCHAT_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "docchat-server starting");

    let store = VectorStore::load(&cfg.store_path)
        .with_context(|| format!("loading vector store from {}", cfg.store_path.display()))?;
    info!(
        path = %cfg.store_path.display(),
        passages = store.len(),
        dimensions = store.dimensions(),
        embedding_model = store.embedding_model(),
        "vector store loaded"
    );

    let provider_cfg = OpenAiConfig::from_env_and_file()?;
    if store.embedding_model() != provider_cfg.embedding_model {
        warn!(
            store = store.embedding_model(),
            provider = %provider_cfg.embedding_model,
            "store was built with a different embedding model"
        );
    }
    let model = cfg
        .default_model
        .clone()
        .unwrap_or_else(|| provider_cfg.model.clone());
    let client = Arc::new(OpenAiClient::new(provider_cfg)?);
    let passages = store.len();
    let retriever = Arc::new(VectorRetriever::new(Arc::new(store), client.clone()));
    let qa = RetrievalQa::new(client.clone(), retriever)
        .top_k(cfg.top_k)
        .with_sources(cfg.with_sources);

    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        client,
        qa: Arc::new(qa),
        model,
        passages,
    });

    let app = routes::build(state);
    let addr: SocketAddr = cfg
        .bind_address
        .parse()
        .with_context(|| format!("DOCCHAT_BIND='{}'", cfg.bind_address))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, mode = ?cfg.mode, marker = %cfg.direct_marker, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("docchat-server stopped");
    Ok(())
}

/// Resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
