//! # Embedded Store
//!
//! sled-backed `Store` implementation for local/offline operation.
//! Grounded on the donor's `storage.rs` (`StorageManager`: sled trees,
//! bincode serialization, flate2 compression of large text, health
//! check) generalized from a single case-metadata/case-text pair of
//! trees to the Document/StructureNode/Section/SyncMeta model, plus a
//! lexical index this backend must build itself since sled has no
//! native full-text search (the relational backend delegates that to
//! Postgres).

use crate::domain::{
    DocType, Document, SearchFilters, SearchHit, SearchMode, Section, SectionSummary,
    StructureNode, StructureType, SyncMeta,
};
use crate::errors::{Result, SearchError};
use crate::shape;
use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

const STRUCTURE_KINDS: [StructureType; 4] = [
    StructureType::Part,
    StructureType::Chapter,
    StructureType::SectionGroup,
    StructureType::Annex,
];

#[derive(Serialize, Deserialize)]
struct StoredSection {
    section_id: String,
    title: Option<String>,
    content_compressed: Vec<u8>,
    address: String,
    char_count: usize,
    embedding: Option<Vec<f32>>,
}

#[derive(Serialize, Deserialize)]
struct StoredStructure {
    structure_type: u8,
    structure_id: String,
    title: String,
    address: String,
    ordinal: usize,
}

fn structure_type_tag(t: StructureType) -> u8 {
    match t {
        StructureType::Part => 0,
        StructureType::Chapter => 1,
        StructureType::SectionGroup => 2,
        StructureType::Annex => 3,
    }
}

fn structure_type_from_tag(tag: u8) -> StructureType {
    STRUCTURE_KINDS[tag as usize % STRUCTURE_KINDS.len()]
}

/// A document-posting list for one lexical term: `(dok_id, section_id,
/// term_frequency)`, rebuilt wholesale on `rebuild_fts_index` rather than
/// incrementally per document — see DESIGN.md's open-question decision on
/// the donor's O(N²) `_rebuild_fts_index`.
struct LexicalIndex {
    postings: HashMap<String, Vec<(String, String, u32)>>,
}

impl LexicalIndex {
    fn empty() -> Self {
        Self { postings: HashMap::new() }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1)
            .map(|t| t.to_string())
            .collect()
    }

    fn lookup(&self, term: &str) -> &[(String, String, u32)] {
        self.postings.get(term).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

pub struct EmbeddedStore {
    db: Arc<sled::Db>,
    documents: sled::Tree,
    sections: sled::Tree,
    structures: sled::Tree,
    sync_meta: sled::Tree,
    lexical: Arc<RwLock<LexicalIndex>>,
}

impl EmbeddedStore {
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db = sled::open(db_path)?;
        let documents = db.open_tree("documents")?;
        let sections = db.open_tree("sections")?;
        let structures = db.open_tree("structures")?;
        let sync_meta = db.open_tree("sync_meta")?;

        let store = Self {
            db: Arc::new(db),
            documents,
            sections,
            structures,
            sync_meta,
            lexical: Arc::new(RwLock::new(LexicalIndex::empty())),
        };
        store.rebuild_fts_index().await?;
        Ok(store)
    }

    fn section_key(dok_id: &str, section_id: &str) -> Vec<u8> {
        format!("{}\0{}", dok_id, section_id).into_bytes()
    }

    fn section_prefix(dok_id: &str) -> Vec<u8> {
        format!("{}\0", dok_id).into_bytes()
    }

    fn structure_prefix(dok_id: &str) -> Vec<u8> {
        format!("{}\0", dok_id).into_bytes()
    }

    fn compress(text: &str) -> Result<Vec<u8>> {
        use std::io::Write;
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(text.as_bytes())?;
        Ok(encoder.finish()?)
    }

    fn decompress(data: &[u8]) -> Result<String> {
        use std::io::Read;
        let mut decoder = flate2::read::GzDecoder::new(data);
        let mut out = String::new();
        decoder.read_to_string(&mut out)?;
        Ok(out)
    }

    fn decode_section(dok_id: &str, bytes: &[u8]) -> Result<Section> {
        let stored: StoredSection = bincode::deserialize(bytes)?;
        let content = Self::decompress(&stored.content_compressed)?;
        Ok(Section {
            dok_id: dok_id.to_string(),
            section_id: stored.section_id,
            title: stored.title,
            content,
            address: stored.address,
            char_count: stored.char_count,
            embedding: stored.embedding,
        })
    }

    fn encode_section(section: &Section) -> Result<Vec<u8>> {
        let stored = StoredSection {
            section_id: section.section_id.clone(),
            title: section.title.clone(),
            content_compressed: Self::compress(&section.content)?,
            address: section.address.clone(),
            char_count: section.char_count,
            embedding: section.embedding.clone(),
        };
        Ok(bincode::serialize(&stored)?)
    }

    fn all_documents(&self) -> Result<Vec<Document>> {
        let mut out = Vec::new();
        for entry in self.documents.iter() {
            let (_, value) = entry.map_err(SearchError::from)?;
            out.push(bincode::deserialize::<Document>(&value)?);
        }
        Ok(out)
    }

    fn candidate_order(mut docs: Vec<Document>) -> Vec<Document> {
        docs.sort_by(|a, b| b.is_current.cmp(&a.is_current).then(a.dok_id.cmp(&b.dok_id)));
        docs
    }
}

#[async_trait]
impl Store for EmbeddedStore {
    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let needle = id.to_lowercase();
        let mut matches: Vec<Document> = self
            .all_documents()?
            .into_iter()
            .filter(|d| {
                d.dok_id.to_lowercase() == needle
                    || d.ref_id.to_lowercase() == needle
                    || d.short_title.to_lowercase() == needle
            })
            .collect();
        matches = Self::candidate_order(matches);
        Ok(matches.into_iter().next())
    }

    async fn find_document(&self, free_text: &str) -> Result<Option<Document>> {
        let needle = free_text.to_lowercase();
        let all = self.all_documents()?;

        if let Some(d) = all.iter().find(|d| d.dok_id.to_lowercase() == needle) {
            return Ok(Some(d.clone()));
        }
        let exact_title: Vec<Document> =
            all.iter().filter(|d| d.short_title.to_lowercase() == needle).cloned().collect();
        if !exact_title.is_empty() {
            return Ok(Self::candidate_order(exact_title).into_iter().next());
        }
        let prefix: Vec<Document> = all
            .iter()
            .filter(|d| d.short_title.to_lowercase().starts_with(&needle))
            .cloned()
            .collect();
        if !prefix.is_empty() {
            return Ok(Self::candidate_order(prefix).into_iter().next());
        }
        let substring_title: Vec<Document> = all
            .iter()
            .filter(|d| d.short_title.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        if !substring_title.is_empty() {
            return Ok(Self::candidate_order(substring_title).into_iter().next());
        }
        let substring_id: Vec<Document> =
            all.iter().filter(|d| d.dok_id.to_lowercase().contains(&needle)).cloned().collect();
        Ok(Self::candidate_order(substring_id).into_iter().next())
    }

    async fn find_similar(&self, free_text: &str, threshold: f64) -> Result<Option<(Document, f64)>> {
        let needle = free_text.to_lowercase();
        let all = self.all_documents()?;
        let mut best: Option<(Document, f64)> = None;
        for doc in all {
            let sim = strsim::jaro_winkler(&needle, &doc.short_title.to_lowercase());
            if sim >= threshold && best.as_ref().map(|(_, b)| sim > *b).unwrap_or(true) {
                best = Some((doc, sim));
            }
        }
        Ok(best)
    }

    async fn get_section(&self, dok_id: &str, section_id: &str) -> Result<Option<Section>> {
        let normalized = section_id.trim_start_matches('§').split_whitespace().collect::<Vec<_>>().join(" ");
        let key = Self::section_key(dok_id, &normalized);
        match self.sections.get(&key)? {
            Some(bytes) => Ok(Some(Self::decode_section(dok_id, &bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_sections_batch(&self, dok_id: &str, ids: &[String]) -> Result<Vec<Section>> {
        let mut out = Vec::new();
        for id in ids {
            if let Some(section) = self.get_section(dok_id, id).await? {
                out.push(section);
            }
        }
        Ok(out)
    }

    async fn list_sections(&self, dok_id: &str) -> Result<Vec<SectionSummary>> {
        let prefix = Self::section_prefix(dok_id);
        let mut out = Vec::new();
        for entry in self.sections.scan_prefix(&prefix) {
            let (_, value) = entry.map_err(SearchError::from)?;
            let stored: StoredSection = bincode::deserialize(&value)?;
            out.push(SectionSummary {
                section_id: stored.section_id,
                title: stored.title,
                char_count: stored.char_count,
                estimated_tokens: (stored.char_count as f64 / 3.5).floor() as usize,
                address: stored.address,
            });
        }
        shape::sort_sections_naturally(&mut out);
        Ok(out)
    }

    async fn list_structures(&self, dok_id: &str) -> Result<Vec<StructureNode>> {
        let prefix = Self::structure_prefix(dok_id);
        let mut out = Vec::new();
        for entry in self.structures.scan_prefix(&prefix) {
            let (_, value) = entry.map_err(SearchError::from)?;
            let stored: StoredStructure = bincode::deserialize(&value)?;
            out.push(StructureNode {
                dok_id: dok_id.to_string(),
                structure_type: structure_type_from_tag(stored.structure_type),
                structure_id: stored.structure_id,
                title: stored.title,
                address: stored.address,
                ordinal: stored.ordinal,
            });
        }
        out.sort_by_key(|s| s.ordinal);
        Ok(out)
    }

    async fn search_fts(&self, query: &str, limit: usize, filters: &SearchFilters) -> Result<Vec<SearchHit>> {
        let tokens = LexicalIndex::tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let index = self.lexical.read();

        let and_hits = self.score_tokens(&index, &tokens);
        let (scored, mode) = if !and_hits.is_empty() {
            (and_hits, SearchMode::And)
        } else {
            let mut or_counts: HashMap<(String, String), u32> = HashMap::new();
            for token in &tokens {
                for (dok_id, section_id, freq) in index.lookup(token) {
                    *or_counts.entry((dok_id.clone(), section_id.clone())).or_insert(0) += freq;
                }
            }
            (or_counts.into_iter().collect(), SearchMode::OrFallback)
        };
        drop(index);

        let mut hits = Vec::new();
        let all_docs = self.all_documents()?;
        for ((dok_id, section_id), score) in scored {
            let Some(doc) = all_docs.iter().find(|d| d.dok_id == dok_id) else { continue };
            if filters.exclude_amendments_or_default() && doc.is_amendment {
                continue;
            }
            if let Some(doc_type) = filters.doc_type {
                if doc.doc_type as u8 != doc_type as u8 {
                    continue;
                }
            }
            if let Some(ministry) = &filters.ministry {
                if !doc.ministry.as_deref().unwrap_or_default().to_lowercase().contains(&ministry.to_lowercase()) {
                    continue;
                }
            }
            if let Some(area) = &filters.legal_area {
                if !doc.legal_area.as_deref().unwrap_or_default().to_lowercase().contains(&area.to_lowercase()) {
                    continue;
                }
            }
            let Some(section) = self.get_section(&dok_id, &section_id).await? else { continue };
            let snippet = shape::highlight_snippet(
                &section.content.chars().take(240).collect::<String>(),
                &tokens.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
            );
            hits.push(SearchHit {
                dok_id: doc.dok_id.clone(),
                section_id: section.section_id.clone(),
                title: section.title.clone(),
                short_title: doc.short_title.clone(),
                doc_type: doc.doc_type,
                based_on: doc.based_on.clone(),
                legal_area: doc.legal_area.clone(),
                snippet,
                rank: score as f64,
                search_mode: mode,
            });
        }
        hits.sort_by(|a, b| b.rank.partial_cmp(&a.rank).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn search_vector(&self, _embedding: &[f32], _limit: usize, _probes: u32) -> Result<Vec<SearchHit>> {
        Err(SearchError::BackendUnavailable { capability: "vector search".to_string() })
    }

    async fn search_hybrid(
        &self,
        _query: &str,
        _embedding: &[f32],
        _limit: usize,
        _fts_weight: f64,
        _probes: u32,
        _filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        Err(SearchError::BackendUnavailable { capability: "hybrid search".to_string() })
    }

    async fn find_related(&self, lov_id: &str) -> Result<Vec<Document>> {
        let docs = self.all_documents()?;
        Ok(docs
            .into_iter()
            .filter(|d| matches!(d.doc_type, DocType::Regulation))
            .filter(|d| d.based_on.as_deref().unwrap_or_default().contains(lov_id))
            .collect())
    }

    async fn list_ministries(&self) -> Result<Vec<String>> {
        let docs = self.all_documents()?;
        let mut set: HashSet<String> = HashSet::new();
        for doc in docs {
            if let Some(ministry) = doc.ministry {
                for part in ministry.split("; ") {
                    set.insert(part.trim().to_string());
                }
            }
        }
        let mut out: Vec<String> = set.into_iter().collect();
        out.sort();
        Ok(out)
    }

    async fn list_legal_areas(&self) -> Result<Vec<String>> {
        let docs = self.all_documents()?;
        let mut set: HashSet<String> = HashSet::new();
        for doc in docs {
            if let Some(area) = doc.legal_area {
                set.insert(area);
            }
        }
        let mut out: Vec<String> = set.into_iter().collect();
        out.sort();
        Ok(out)
    }

    async fn upsert_document(
        &self,
        document: Document,
        structures: Vec<StructureNode>,
        sections: Vec<Section>,
    ) -> Result<()> {
        let prefix = Self::section_prefix(&document.dok_id);
        let old_keys: Vec<sled::IVec> =
            self.sections.scan_prefix(&prefix).keys().filter_map(|k| k.ok()).collect();
        let old_structure_keys: Vec<sled::IVec> = self
            .structures
            .scan_prefix(Self::structure_prefix(&document.dok_id))
            .keys()
            .filter_map(|k| k.ok())
            .collect();

        let mut batch = sled::Batch::default();
        for key in &old_keys {
            batch.remove(key.clone());
        }
        for section in &sections {
            let key = Self::section_key(&document.dok_id, &section.section_id);
            batch.insert(key, Self::encode_section(section)?);
        }
        self.sections.apply_batch(batch)?;

        let mut structure_batch = sled::Batch::default();
        for key in &old_structure_keys {
            structure_batch.remove(key.clone());
        }
        for (ordinal, node) in structures.iter().enumerate() {
            let key = format!("{}\0{:06}", document.dok_id, ordinal).into_bytes();
            let stored = StoredStructure {
                structure_type: structure_type_tag(node.structure_type),
                structure_id: node.structure_id.clone(),
                title: node.title.clone(),
                address: node.address.clone(),
                ordinal,
            };
            structure_batch.insert(key, bincode::serialize(&stored)?);
        }
        self.structures.apply_batch(structure_batch)?;

        let doc_key = document.dok_id.clone();
        self.documents.insert(doc_key.as_bytes(), bincode::serialize(&document)?)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn reconcile_current(&self, doc_type: DocType, present_ids: &[String]) -> Result<()> {
        let present: HashSet<&str> = present_ids.iter().map(|s| s.as_str()).collect();
        let docs = self.all_documents()?;
        for mut doc in docs {
            if doc.doc_type as u8 != doc_type as u8 {
                continue;
            }
            let should_be_current = present.contains(doc.dok_id.as_str());
            if doc.is_current != should_be_current {
                doc.is_current = should_be_current;
                self.documents.insert(doc.dok_id.as_bytes(), bincode::serialize(&doc)?)?;
            }
        }
        self.db.flush_async().await?;
        Ok(())
    }

    async fn rebuild_fts_index(&self) -> Result<()> {
        let mut postings: HashMap<String, Vec<(String, String, u32)>> = HashMap::new();
        for entry in self.sections.iter() {
            let (key, value) = entry.map_err(SearchError::from)?;
            let key_str = String::from_utf8_lossy(&key).to_string();
            let Some((dok_id, _)) = key_str.split_once('\0') else { continue };
            let stored: StoredSection = bincode::deserialize(&value)?;
            let content = Self::decompress(&stored.content_compressed)?;
            if content.is_empty() {
                continue;
            }
            let mut term_counts: HashMap<String, u32> = HashMap::new();
            for token in LexicalIndex::tokenize(&content) {
                *term_counts.entry(token).or_insert(0) += 1;
            }
            for (term, count) in term_counts {
                postings.entry(term).or_default().push((dok_id.to_string(), stored.section_id.clone(), count));
            }
        }
        *self.lexical.write() = LexicalIndex { postings };
        Ok(())
    }

    async fn get_sync_status(&self) -> Result<Vec<SyncMeta>> {
        let mut out = Vec::new();
        for entry in self.sync_meta.iter() {
            let (_, value) = entry.map_err(SearchError::from)?;
            out.push(bincode::deserialize::<SyncMeta>(&value)?);
        }
        Ok(out)
    }

    async fn set_sync_status(&self, dataset: &str, remote_mtime: DateTime<Utc>, file_count: usize) -> Result<()> {
        let meta = SyncMeta { dataset: dataset.to_string(), last_modified: remote_mtime, synced_at: Utc::now(), file_count };
        self.sync_meta.insert(dataset.as_bytes(), bincode::serialize(&meta)?)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn is_synced(&self) -> Result<bool> {
        Ok(!self.sync_meta.is_empty())
    }

    fn supports_vector_search(&self) -> bool {
        false
    }
}

impl EmbeddedStore {
    fn score_tokens(&self, index: &LexicalIndex, tokens: &[String]) -> Vec<((String, String), u32)> {
        let mut per_doc: HashMap<(String, String), u32> = HashMap::new();
        let mut matched_tokens: HashMap<(String, String), HashSet<&str>> = HashMap::new();
        for token in tokens {
            for (dok_id, section_id, freq) in index.lookup(token) {
                let key = (dok_id.clone(), section_id.clone());
                *per_doc.entry(key.clone()).or_insert(0) += freq;
                matched_tokens.entry(key).or_default().insert(token.as_str());
            }
        }
        per_doc
            .into_iter()
            .filter(|(key, _)| matched_tokens.get(key).map(|s| s.len()) == Some(tokens.len()))
            .collect()
    }
}
