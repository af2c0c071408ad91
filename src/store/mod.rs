//! # Store
//!
//! §4.A and §9's "single capability set" re-architecture: one `Store`
//! trait, two implementations (`embedded`, sled-backed; `relational`,
//! sqlx/Postgres-backed) that satisfy it byte-identically at the
//! response-shape level. The donor has exactly one concrete storage
//! type (`StorageManager` in its own `storage.rs`); this trait is the
//! generalization of that shape to admit a second backend rather than
//! dispatching on a runtime-probed attribute.

pub mod embedded;
pub mod relational;

use crate::domain::{
    Document, SearchFilters, SearchHit, Section, SectionSummary, StructureNode, SyncMeta,
};
use crate::errors::Result;
use async_trait::async_trait;

/// Capability set both backends must implement. Operations that only the
/// relational backend can satisfy (`search_vector`, `search_hybrid`,
/// `find_similar`) return `Err(SearchError::BackendUnavailable { .. })` from
/// the embedded backend rather than panicking or silently no-op'ing.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    async fn find_document(&self, free_text: &str) -> Result<Option<Document>>;

    /// Trigram similarity against `short_title`; only offered when the
    /// backend provides trigram support (embedded backend: in-process
    /// `strsim` computation; relational backend: `pg_trgm`).
    async fn find_similar(&self, free_text: &str, threshold: f64) -> Result<Option<(Document, f64)>>;

    async fn get_section(&self, dok_id: &str, section_id: &str) -> Result<Option<Section>>;

    async fn get_sections_batch(&self, dok_id: &str, ids: &[String]) -> Result<Vec<Section>>;

    async fn list_sections(&self, dok_id: &str) -> Result<Vec<SectionSummary>>;

    async fn list_structures(&self, dok_id: &str) -> Result<Vec<StructureNode>>;

    async fn search_fts(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>>;

    async fn search_vector(
        &self,
        embedding: &[f32],
        limit: usize,
        probes: u32,
    ) -> Result<Vec<SearchHit>>;

    #[allow(clippy::too_many_arguments)]
    async fn search_hybrid(
        &self,
        query: &str,
        embedding: &[f32],
        limit: usize,
        fts_weight: f64,
        probes: u32,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>>;

    async fn find_related(&self, lov_id: &str) -> Result<Vec<Document>>;

    async fn list_ministries(&self) -> Result<Vec<String>>;

    async fn list_legal_areas(&self) -> Result<Vec<String>>;

    /// Atomic per document: replaces this `dok_id`'s structures and sections.
    async fn upsert_document(
        &self,
        document: Document,
        structures: Vec<StructureNode>,
        sections: Vec<Section>,
    ) -> Result<()>;

    /// Sets `is_current = (dok_id ∈ present_ids)` for all documents of `doc_type`.
    async fn reconcile_current(
        &self,
        doc_type: crate::domain::DocType,
        present_ids: &[String],
    ) -> Result<()>;

    /// Rebuilds the lexical index once, after reconciliation — see DESIGN.md's
    /// open-question decision on the donor's per-document `_rebuild_fts_index`.
    async fn rebuild_fts_index(&self) -> Result<()>;

    async fn get_sync_status(&self) -> Result<Vec<SyncMeta>>;

    async fn set_sync_status(
        &self,
        dataset: &str,
        remote_mtime: chrono::DateTime<chrono::Utc>,
        file_count: usize,
    ) -> Result<()>;

    async fn is_synced(&self) -> Result<bool>;

    /// Whether this backend can answer `search_vector`/`search_hybrid`/`find_similar`.
    fn supports_vector_search(&self) -> bool;
}

/// Cosine similarity mapped to `[0, 1]` per §4.A: `(1 + cos) / 2`.
pub fn cosine_to_unit_interval(cos_sim: f64) -> f64 {
    (1.0 + cos_sim) / 2.0
}

/// `combined = fts_weight · normalized_fts_rank + (1 − fts_weight) · cos_sim`
pub fn hybrid_score(normalized_fts_rank: f64, cos_sim_unit: f64, fts_weight: f64) -> f64 {
    fts_weight * normalized_fts_rank + (1.0 - fts_weight) * cos_sim_unit
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_maps_into_unit_interval() {
        assert_eq!(cosine_to_unit_interval(1.0), 1.0);
        assert_eq!(cosine_to_unit_interval(-1.0), 0.0);
        assert_eq!(cosine_to_unit_interval(0.0), 0.5);
    }

    #[test]
    fn hybrid_score_is_monotonic_in_each_input() {
        let base = hybrid_score(0.4, 0.4, 0.5);
        assert!(hybrid_score(0.6, 0.4, 0.5) > base);
        assert!(hybrid_score(0.4, 0.6, 0.5) > base);
    }

    #[test]
    fn cosine_similarity_of_identical_unit_vectors_is_one() {
        let v = vec![0.6_f32, 0.8];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }
}
