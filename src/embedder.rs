//! # Embedder
//!
//! §4.D: `embed(text) → unit vector[EMB_DIM]`, LRU-cached by raw query
//! string (capacity 1000), with any provider failure swallowed into a
//! lexical-only fallback by the caller. Grounded on the donor's
//! `vector.rs` (`VectorCache`/`EmbeddingModel` shape) but with the
//! donor's "evict first key" cache replaced by a real LRU (the donor's
//! `HashMap::keys().next()` eviction order is arbitrary, not actually
//! least-recently-used) and the donor's stub zero-vector encoder
//! replaced by a trait so a concrete HTTP provider can be swapped in
//! without touching the cache or the Resolver/Query engine that
//! depend on this type. The concrete provider (model, auth, endpoint)
//! is out of scope per §1; `GeminiEmbedProvider` below is the
//! production shape grounded on `original_source/vector_search.py`'s
//! request fields, kept minimal since its exact wire contract is a
//! collaborator concern, not this crate's.

use crate::errors::{Result, SearchError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

#[async_trait]
pub trait EmbedProvider: Send + Sync {
    async fn embed_raw(&self, text: &str) -> Result<Vec<f32>>;
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

struct LruCache {
    capacity: usize,
    entries: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
}

impl LruCache {
    fn new(capacity: usize) -> Self {
        Self { capacity, entries: HashMap::new(), order: VecDeque::new() }
    }

    fn get(&mut self, key: &str) -> Option<Vec<f32>> {
        if let Some(value) = self.entries.get(key).cloned() {
            self.touch(key);
            Some(value)
        } else {
            None
        }
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }

    fn put(&mut self, key: String, value: Vec<f32>) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.touch(&key);
        self.entries.insert(key, value);
    }
}

/// Owns the LRU cache (§9: "wrap it in a small thread-safe cache value with
/// explicit capacity" rather than process-wide mutable state) and delegates
/// actual embedding generation to a pluggable `EmbedProvider`.
pub struct Embedder {
    provider: Box<dyn EmbedProvider>,
    cache: Mutex<LruCache>,
    timeout: Duration,
}

impl Embedder {
    pub fn new(provider: Box<dyn EmbedProvider>, cache_size: usize, timeout: Duration) -> Self {
        Self { provider, cache: Mutex::new(LruCache::new(cache_size)), timeout }
    }

    /// `embed(text, task="QUERY")`. On any provider error this returns
    /// `Err`; per §4.D the *caller* (the Query engine) is responsible for
    /// falling back to lexical-only search and logging, not this method.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.cache.lock().get(text) {
            return Ok(cached);
        }

        let raw = tokio::time::timeout(self.timeout, self.provider.embed_raw(text))
            .await
            .map_err(|_| SearchError::Transient("embedding request timed out".to_string()))??;
        let vector = normalize(raw);
        self.cache.lock().put(text.to_string(), vector.clone());
        Ok(vector)
    }
}

/// Grounded on `original_source/vector_search.py`'s Gemini REST call shape
/// (`gemini-embedding-001`, `RETRIEVAL_QUERY` task type); the concrete HTTP
/// exchange is a thin collaborator and intentionally not exercised by tests
/// here — only the `Embedder`'s cache/fallback behavior is this crate's
/// concern.
pub struct GeminiEmbedProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiEmbedProvider {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder().timeout(timeout).build().unwrap_or_default();
        Self { client, api_key, model }
    }
}

#[async_trait]
impl EmbedProvider for GeminiEmbedProvider {
    async fn embed_raw(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:embedContent?key={}",
            self.model, self.api_key
        );
        let body = serde_json::json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": text }] },
            "taskType": "RETRIEVAL_QUERY",
        });
        let response = self.client.post(&url).json(&body).send().await?;
        let response = response.error_for_status()?;
        let parsed: serde_json::Value = response.json().await?;
        let values = parsed["embedding"]["values"]
            .as_array()
            .ok_or_else(|| SearchError::Permanent("embedding response missing values".to_string()))?;
        values
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32).ok_or_else(|| SearchError::Permanent("non-numeric embedding value".to_string())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingProvider {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EmbedProvider for CountingProvider {
        async fn embed_raw(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![3.0, 4.0])
        }
    }

    #[tokio::test]
    async fn caches_by_raw_query_string() {
        let calls = Arc::new(AtomicUsize::new(0));
        let embedder = Embedder::new(Box::new(CountingProvider { calls: calls.clone() }), 1000, Duration::from_secs(5));
        let first = embedder.embed("oppsigelse").await.unwrap();
        let second = embedder.embed("oppsigelse").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn embeddings_are_unit_normalized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let embedder = Embedder::new(Box::new(CountingProvider { calls }), 1000, Duration::from_secs(5));
        let v = embedder.embed("test").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn evicts_least_recently_used_entry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let embedder = Embedder::new(Box::new(CountingProvider { calls: calls.clone() }), 2, Duration::from_secs(5));
        embedder.embed("a").await.unwrap();
        embedder.embed("b").await.unwrap();
        embedder.embed("a").await.unwrap(); // touches "a", "b" now least-recent
        embedder.embed("c").await.unwrap(); // evicts "b"
        calls.store(0, Ordering::SeqCst);
        embedder.embed("b").await.unwrap(); // must recompute
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
