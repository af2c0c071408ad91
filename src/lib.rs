//! # Lovkode
//!
//! A lookup and search service for Norwegian laws and regulations
//! (`lover`) and central regulations (`forskrifter`), combining exact
//! identifier/alias resolution, full-text search, and optional
//! embedding-backed hybrid search over a pluggable storage backend.
//!
//! ## Architecture
//! - `domain`: the Document/Section/StructureNode data model
//! - `store`: the storage capability trait and its embedded (sled) and
//!   relational (Postgres) implementations
//! - `parser`: turns one archive entry into a Document/structures/sections
//! - `ingestion`: syncs the Lovdata datasets into a `Store`
//! - `embedder`: query embedding with an LRU cache
//! - `resolver`: free text → Document resolution
//! - `query`: the public query-engine operations
//! - `shape`: pure response formatting
//! - `config`: layered configuration
//! - `errors`: the shared error taxonomy

pub mod config;
pub mod domain;
pub mod embedder;
pub mod errors;
pub mod ingestion;
pub mod parser;
pub mod query;
pub mod resolver;
pub mod shape;
pub mod store;
pub mod utils;

pub use config::Config;
pub use errors::{Result, SearchError};
pub use query::QueryEngine;

use embedder::{Embedder, GeminiEmbedProvider};
use ingestion::Ingestor;
use std::sync::Arc;
use store::{embedded::EmbeddedStore, relational::RelationalStore, Store};

/// Owns every long-lived handle the binary needs: the configured `Store`,
/// the `QueryEngine` built on top of it, and the `Ingestor` used by the
/// `sync` admin command. Explicit and constructed once at startup,
/// replacing the donor's `AppState` (which held the donor's
/// search-engine/storage pair the same way) generalized to this crate's
/// Store/QueryEngine/Ingestor triple.
pub struct Service {
    pub store: Arc<dyn Store>,
    pub query: QueryEngine,
    pub ingestor: Ingestor,
}

impl Service {
    pub async fn new(config: &Config) -> Result<Self> {
        let store: Arc<dyn Store> = match config.store.backend {
            config::StoreBackend::Embedded => Arc::new(EmbeddedStore::open(&config.store.embedded_path).await?),
            config::StoreBackend::Relational => {
                let url = config
                    .store
                    .database_url
                    .as_deref()
                    .ok_or_else(|| SearchError::InvalidInput("store.database_url is required".to_string()))?;
                Arc::new(RelationalStore::connect(url, config.store.max_connections).await?)
            }
        };

        let embedder = config.embedding.api_key.clone().map(|api_key| {
            Arc::new(Embedder::new(
                Box::new(GeminiEmbedProvider::new(
                    api_key,
                    config.embedding.model.clone(),
                    std::time::Duration::from_secs(config.embedding.request_timeout_secs),
                )),
                config.embedding.cache_size,
                std::time::Duration::from_secs(config.embedding.request_timeout_secs),
            ))
        });

        let query = QueryEngine::new(store.clone(), embedder, config.search.default_fts_weight);
        let ingestor = Ingestor::new(store.clone(), config.ingestion.clone())?;

        Ok(Self { store, query, ingestor })
    }
}
