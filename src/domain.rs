//! # Domain Model
//!
//! The core entities of §3: Document, StructureNode, Section, SyncMeta,
//! and the static alias table. Replaces the donor's US-case-law
//! `CaseMetadata`/`DocRef`/`Jurisdiction` shape with the Norwegian
//! statute/regulation model this crate actually indexes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `law` or `regulation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocType {
    Law,
    Regulation,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Law => "law",
            DocType::Regulation => "regulation",
        }
    }
}

/// `part`, `chapter`, `section-group`, or `annex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureType {
    Part,
    Chapter,
    SectionGroup,
    Annex,
}

impl StructureType {
    /// Indentation level used by §4.F's ToC rendering.
    pub fn indent_level(&self) -> usize {
        match self {
            StructureType::Part => 0,
            StructureType::Chapter => 1,
            StructureType::SectionGroup | StructureType::Annex => 2,
        }
    }
}

/// A law or regulation. Primary key `dok_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub dok_id: String,
    pub ref_id: String,
    pub title: String,
    pub short_title: String,
    pub date_in_force: Option<DateTime<Utc>>,
    /// Delimited with `"; "` when more than one ministry is named.
    pub ministry: Option<String>,
    pub doc_type: DocType,
    pub is_amendment: bool,
    pub legal_area: Option<String>,
    /// Delimited list of `(doc_id, section?)` references; see `shape::format_based_on`.
    pub based_on: Option<String>,
    pub is_current: bool,
    pub indexed_at: DateTime<Utc>,
}

/// A hierarchical grouping inside a document's table of contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureNode {
    pub dok_id: String,
    pub structure_type: StructureType,
    pub structure_id: String,
    pub title: String,
    /// A path string such as `/chapter/1/`.
    pub address: String,
    /// Position among this document's structure nodes, for document order.
    pub ordinal: usize,
}

/// A leaf regulatory unit; the atom of retrieval. Unique on `(dok_id, section_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub dok_id: String,
    pub section_id: String,
    pub title: Option<String>,
    pub content: String,
    pub address: String,
    pub char_count: usize,
    pub embedding: Option<Vec<f32>>,
}

impl Section {
    pub const EMB_DIM: usize = 1536;

    pub fn estimated_tokens(&self) -> usize {
        (self.char_count as f64 / 3.5).floor() as usize
    }
}

/// Summary projection of a Section returned by `Store::list_sections`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionSummary {
    pub section_id: String,
    pub title: Option<String>,
    pub char_count: usize,
    pub estimated_tokens: usize,
    pub address: String,
}

/// Per-dataset ingest bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMeta {
    pub dataset: String,
    pub last_modified: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
    pub file_count: usize,
}

/// A ranked full-text search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub dok_id: String,
    pub section_id: String,
    pub title: Option<String>,
    pub short_title: String,
    pub doc_type: DocType,
    pub based_on: Option<String>,
    pub legal_area: Option<String>,
    pub snippet: String,
    pub rank: f64,
    pub search_mode: SearchMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMode {
    And,
    OrFallback,
    Hybrid,
}

/// Filters accepted by `Store::search_fts`/`search_hybrid`.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub exclude_amendments: Option<bool>,
    pub ministry: Option<String>,
    pub doc_type: Option<DocType>,
    pub legal_area: Option<String>,
}

impl SearchFilters {
    pub fn exclude_amendments_or_default(&self) -> bool {
        self.exclude_amendments.unwrap_or(true)
    }
}

/// The small seeded alias → canonical-id table, distinct from the dynamic
/// short-title index Store maintains. Seed entries cover the handful of
/// statutes referenced by name in everyday speech; anything else falls
/// through to `Store::find_document`/`find_similar`.
pub struct AliasTable {
    entries: Vec<(&'static str, &'static str, &'static str)>,
}

impl AliasTable {
    pub fn seeded() -> Self {
        Self {
            entries: vec![
                ("avhendingslova", "lov/1992-07-03-93", "Avhendingslova"),
                ("husleieloven", "lov/1999-03-26-17", "Husleieloven"),
                ("arbeidsmiljoloven", "lov/2005-06-17-62", "Arbeidsmiljøloven"),
                ("aml", "lov/2005-06-17-62", "Arbeidsmiljøloven"),
                ("straffeloven", "lov/2005-05-20-28", "Straffeloven"),
                ("grunnloven", "lov/1814-05-17", "Grunnloven"),
                ("forvaltningsloven", "lov/1967-02-10", "Forvaltningsloven"),
            ],
        }
    }

    /// Normalize an input the way §4.E tier 1 does: lowercase, spaces and
    /// underscores become hyphens.
    pub fn normalize_key(input: &str) -> String {
        input
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '_' { '-' } else { c })
            .collect()
    }

    pub fn lookup(&self, input: &str) -> Option<&'static str> {
        let key = Self::normalize_key(input);
        self.entries
            .iter()
            .find(|(alias, _, _)| *alias == key)
            .map(|(_, dok_id, _)| *dok_id)
    }

    /// All `(alias, dok_id, display_name)` triples, for `list_aliases`.
    pub fn all(&self) -> &[(&'static str, &'static str, &'static str)] {
        &self.entries
    }
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::seeded()
    }
}
