//! # Resolver
//!
//! §4.E: turns free-text naming a law or regulation into a `Document`.
//! Four tiers, tried in order, first hit wins:
//!   1. `AliasTable` lookup (normalized key match)
//!   2. `Store::find_document` (exact/substring match on id/title)
//!   3. `Store::find_similar` (trigram similarity, input length ≥ 8,
//!      threshold 0.4) — tried on every backend; a miss or a
//!      `BackendUnavailable` from this tier (a backend genuinely
//!      lacking trigram support) is treated as "no match", not an
//!      error, so resolution still falls through to tier 4.
//!   4. As-is / uppercase-if-looks-like-a-lov-or-for-id fallback, which
//!      hands the raw text back to the caller as an unresolved id rather
//!      than failing the whole lookup.
//!
//! Grounded on the donor's `search.rs` free-text matching cascade
//! (exact → fuzzy → fallback), generalized to the statute/regulation
//! domain and to the explicit `Store` trait instead of the donor's
//! concrete `StorageManager`.

use crate::domain::{AliasTable, Document};
use crate::errors::{Result, SearchError};
use crate::store::Store;
use std::sync::Arc;

const SIMILARITY_MIN_LEN: usize = 8;
const SIMILARITY_THRESHOLD: f64 = 0.4;

pub struct Resolver {
    store: Arc<dyn Store>,
    aliases: AliasTable,
}

/// What tier resolved the input, for logging and for callers that want to
/// surface match confidence (e.g. "did you mean?" prompts).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolutionTier {
    Alias,
    Exact,
    Similar,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub document: Option<Document>,
    pub tier: ResolutionTier,
    /// Present only when `tier == Similar`.
    pub similarity: Option<f64>,
}

impl Resolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, aliases: AliasTable::seeded() }
    }

    pub async fn resolve(&self, free_text: &str) -> Result<Resolution> {
        let trimmed = free_text.trim();
        if trimmed.is_empty() {
            return Err(SearchError::InvalidInput("empty lookup text".to_string()));
        }

        if let Some(dok_id) = self.aliases.lookup(trimmed) {
            if let Some(document) = self.store.get_document(dok_id).await? {
                return Ok(Resolution { document: Some(document), tier: ResolutionTier::Alias, similarity: None });
            }
        }

        if let Some(document) = self.store.find_document(trimmed).await? {
            return Ok(Resolution { document: Some(document), tier: ResolutionTier::Exact, similarity: None });
        }

        if trimmed.chars().count() >= SIMILARITY_MIN_LEN {
            match self.store.find_similar(trimmed, SIMILARITY_THRESHOLD).await {
                Ok(Some((document, score))) => {
                    return Ok(Resolution { document: Some(document), tier: ResolutionTier::Similar, similarity: Some(score) });
                }
                Ok(None) => {}
                Err(SearchError::BackendUnavailable { .. }) => {}
                Err(err) => return Err(err),
            }
        }

        Ok(Resolution { document: None, tier: ResolutionTier::Fallback, similarity: None })
    }

    /// The raw fallback id a caller can still try verbatim: uppercased when
    /// it already looks like a `lov/`/`for/` prefixed id, untouched otherwise.
    pub fn fallback_id(free_text: &str) -> String {
        let trimmed = free_text.trim();
        let lower = trimmed.to_lowercase();
        if lower.starts_with("lov/") || lower.starts_with("for/") {
            lower
        } else {
            trimmed.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DocType, SearchFilters, SectionSummary, StructureNode, SyncMeta};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct FakeStore {
        documents: Mutex<Vec<Document>>,
        find_document_calls: Mutex<usize>,
        find_similar_calls: Mutex<usize>,
        supports_vector: bool,
    }

    fn sample_document(dok_id: &str, short_title: &str) -> Document {
        Document {
            dok_id: dok_id.to_string(),
            ref_id: dok_id.to_string(),
            title: short_title.to_string(),
            short_title: short_title.to_string(),
            date_in_force: None,
            ministry: None,
            doc_type: DocType::Law,
            is_amendment: false,
            legal_area: None,
            based_on: None,
            is_current: true,
            indexed_at: Utc::now(),
        }
    }

    #[async_trait]
    impl Store for FakeStore {
        async fn get_document(&self, id: &str) -> Result<Option<Document>> {
            Ok(self.documents.lock().unwrap().iter().find(|d| d.dok_id == id).cloned())
        }
        async fn find_document(&self, free_text: &str) -> Result<Option<Document>> {
            *self.find_document_calls.lock().unwrap() += 1;
            Ok(self
                .documents
                .lock()
                .unwrap()
                .iter()
                .find(|d| d.short_title.eq_ignore_ascii_case(free_text))
                .cloned())
        }
        async fn find_similar(&self, _free_text: &str, _threshold: f64) -> Result<Option<(Document, f64)>> {
            *self.find_similar_calls.lock().unwrap() += 1;
            if !self.supports_vector {
                return Err(SearchError::BackendUnavailable { capability: "trigram similarity".to_string() });
            }
            Ok(self.documents.lock().unwrap().first().cloned().map(|d| (d, 0.5)))
        }
        async fn get_section(&self, _dok_id: &str, _section_id: &str) -> Result<Option<crate::domain::Section>> {
            Ok(None)
        }
        async fn get_sections_batch(&self, _dok_id: &str, _ids: &[String]) -> Result<Vec<crate::domain::Section>> {
            Ok(vec![])
        }
        async fn list_sections(&self, _dok_id: &str) -> Result<Vec<SectionSummary>> {
            Ok(vec![])
        }
        async fn list_structures(&self, _dok_id: &str) -> Result<Vec<StructureNode>> {
            Ok(vec![])
        }
        async fn search_fts(&self, _query: &str, _limit: usize, _filters: &SearchFilters) -> Result<Vec<crate::domain::SearchHit>> {
            Ok(vec![])
        }
        async fn search_vector(&self, _embedding: &[f32], _limit: usize, _probes: u32) -> Result<Vec<crate::domain::SearchHit>> {
            Ok(vec![])
        }
        async fn search_hybrid(
            &self,
            _query: &str,
            _embedding: &[f32],
            _limit: usize,
            _fts_weight: f64,
            _probes: u32,
            _filters: &SearchFilters,
        ) -> Result<Vec<crate::domain::SearchHit>> {
            Ok(vec![])
        }
        async fn find_related(&self, _lov_id: &str) -> Result<Vec<Document>> {
            Ok(vec![])
        }
        async fn list_ministries(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn list_legal_areas(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn upsert_document(&self, _document: Document, _structures: Vec<StructureNode>, _sections: Vec<crate::domain::Section>) -> Result<()> {
            Ok(())
        }
        async fn reconcile_current(&self, _doc_type: DocType, _present_ids: &[String]) -> Result<()> {
            Ok(())
        }
        async fn rebuild_fts_index(&self) -> Result<()> {
            Ok(())
        }
        async fn get_sync_status(&self) -> Result<Vec<SyncMeta>> {
            Ok(vec![])
        }
        async fn set_sync_status(&self, _dataset: &str, _remote_mtime: chrono::DateTime<Utc>, _file_count: usize) -> Result<()> {
            Ok(())
        }
        async fn is_synced(&self) -> Result<bool> {
            Ok(true)
        }
        fn supports_vector_search(&self) -> bool {
            self.supports_vector
        }
    }

    #[tokio::test]
    async fn alias_tier_short_circuits_everything_else() {
        let store = Arc::new(FakeStore {
            documents: Mutex::new(vec![sample_document("lov/2005-06-17-62", "Arbeidsmiljøloven")]),
            find_document_calls: Mutex::new(0),
            find_similar_calls: Mutex::new(0),
            supports_vector: true,
        });
        let resolver = Resolver::new(store.clone());
        let resolution = resolver.resolve("aml").await.unwrap();
        assert_eq!(resolution.tier, ResolutionTier::Alias);
        assert_eq!(*store.find_document_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn falls_through_to_exact_tier() {
        let store = Arc::new(FakeStore {
            documents: Mutex::new(vec![sample_document("lov/1999-03-26-17", "Husleieloven")]),
            find_document_calls: Mutex::new(0),
            find_similar_calls: Mutex::new(0),
            supports_vector: true,
        });
        let resolver = Resolver::new(store);
        let resolution = resolver.resolve("Husleieloven").await.unwrap();
        assert_eq!(resolution.tier, ResolutionTier::Exact);
    }

    #[tokio::test]
    async fn backend_unavailable_from_similarity_tier_is_a_miss_not_an_error() {
        let store = Arc::new(FakeStore {
            documents: Mutex::new(vec![]),
            find_document_calls: Mutex::new(0),
            find_similar_calls: Mutex::new(0),
            supports_vector: true,
        });
        let resolver = Resolver::new(store);
        let resolution = resolver.resolve("noenlangtekstsomikkematcher").await.unwrap();
        assert_eq!(resolution.tier, ResolutionTier::Fallback);
    }

    #[tokio::test]
    async fn tier_three_runs_even_when_the_store_does_not_advertise_vector_search() {
        let store = Arc::new(FakeStore {
            documents: Mutex::new(vec![]),
            find_document_calls: Mutex::new(0),
            find_similar_calls: Mutex::new(0),
            supports_vector: false,
        });
        let resolver = Resolver::new(store.clone());
        let resolution = resolver.resolve("noenlangtekstsomikkematcher").await.unwrap();
        assert_eq!(resolution.tier, ResolutionTier::Fallback);
        assert_eq!(*store.find_similar_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn short_input_skips_similarity_tier() {
        let store = Arc::new(FakeStore {
            documents: Mutex::new(vec![]),
            find_document_calls: Mutex::new(0),
            find_similar_calls: Mutex::new(0),
            supports_vector: true,
        });
        let resolver = Resolver::new(store.clone());
        let _ = resolver.resolve("abc").await.unwrap();
        assert_eq!(*store.find_similar_calls.lock().unwrap(), 0);
    }

    #[test]
    fn fallback_id_uppercases_nothing_but_lowercases_known_prefixes() {
        assert_eq!(Resolver::fallback_id("LOV/2005-06-17-62"), "lov/2005-06-17-62");
        assert_eq!(Resolver::fallback_id("some free text"), "some free text");
    }
}
