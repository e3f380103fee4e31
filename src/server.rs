//! HTTP facade over the query, lineage and sync layers.
use self::config::Config;
use self::error::ApiResult;
use crate::MetadataStore;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod error;
mod stream;
#[cfg(test)]
mod tests;

#[derive(Debug, Clone)]
pub struct AppState {
    /// Requests, and pushes in particular, are serialized on the store.
    pub store: Arc<Mutex<MetadataStore>>,
    pub stream_threshold: usize,
}

impl AppState {
    pub fn new(store: MetadataStore, stream_threshold: usize) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            stream_threshold,
        }
    }

    /// Locks the store, discarding what a cancelled request left uncommitted.
    pub async fn store(&self) -> ApiResult<MutexGuard<'_, MetadataStore>> {
        let mut store = self.store.lock().await;
        store
            .discard_aborted_transaction()
            .await
            .map_err(crate::errors::Error::from)?;
        Ok(store)
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/mlmd_push", post(api::push))
        .route("/mlmd_pull/{pipeline}", get(api::pull))
        .route("/mlmd_delta", get(api::delta))
        .route("/pipelines", get(api::pipelines))
        .route("/executions/{pipeline}", get(api::executions))
        .route("/artifacts/{pipeline}/{type}", get(api::artifacts))
        .route(
            "/artifact-lineage/force-directed-graph/{pipeline}",
            get(api::artifact_force_graph),
        )
        .route(
            "/artifact-lineage/tangled-tree/{pipeline}",
            get(api::artifact_tangled_tree),
        )
        .route(
            "/execution-lineage/tangled-tree/{uuid}/{pipeline}",
            get(api::execution_tangled_tree),
        )
        .route(
            "/artifact-execution-lineage/tangled-tree/{pipeline}",
            get(api::artifact_execution_tangled_tree),
        )
        .route("/model-card", get(api::model_card))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Connects to the configured store and serves until the listener fails.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let database_uri = config.database_uri();
    let store = MetadataStore::connect(&database_uri).await?;
    tracing::info!(backend = backend_of(&database_uri), "connected to the metadata store");
    if config.neo4j_uri.is_some() {
        tracing::warn!("NEO4J_URI is set but no graph sink is available; skipping");
    }

    let app = create_router(AppState::new(store, config.stream_threshold));
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

fn backend_of(database_uri: &str) -> &str {
    database_uri.split(':').next().unwrap_or(database_uri)
}
