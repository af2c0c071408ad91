//! # Relational Store
//!
//! sqlx/Postgres-backed `Store` implementation. The donor has no
//! relational backend at all (its only storage type is the sled
//! `StorageManager`); this module is new, grounded on
//! `original_source/vector_search.py`'s RPC shapes
//! (`search_lovdata`, `search_lovdata_hybrid`, `search_lovdata_vector`)
//! for what the native search operations need to return, and on the
//! `sqlx` usage patterns found elsewhere in the retrieval pack for how
//! to structure pooled async queries in the donor's idiom (`Result`
//! propagation via `?`, `tracing` spans around I/O).
//!
//! This is the only backend that answers `search_vector`/
//! `search_hybrid`/`find_similar`, per §4.A.

use crate::domain::{
    DocType, Document, SearchFilters, SearchHit, SearchMode, Section, SectionSummary,
    StructureNode, StructureType, SyncMeta,
};
use crate::errors::{Result, SearchError};
use crate::store::{cosine_to_unit_interval, hybrid_score, Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

pub struct RelationalStore {
    pool: PgPool,
}

fn doc_type_str(t: DocType) -> &'static str {
    match t {
        DocType::Law => "law",
        DocType::Regulation => "regulation",
    }
}

fn doc_type_from_str(s: &str) -> DocType {
    if s == "regulation" {
        DocType::Regulation
    } else {
        DocType::Law
    }
}

fn structure_type_str(t: StructureType) -> &'static str {
    match t {
        StructureType::Part => "part",
        StructureType::Chapter => "chapter",
        StructureType::SectionGroup => "section-group",
        StructureType::Annex => "annex",
    }
}

fn structure_type_from_str(s: &str) -> StructureType {
    match s {
        "part" => StructureType::Part,
        "chapter" => StructureType::Chapter,
        "annex" => StructureType::Annex,
        _ => StructureType::SectionGroup,
    }
}

impl RelationalStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                dok_id TEXT PRIMARY KEY,
                ref_id TEXT NOT NULL,
                title TEXT NOT NULL,
                short_title TEXT NOT NULL,
                date_in_force TIMESTAMPTZ,
                ministry TEXT,
                doc_type TEXT NOT NULL,
                is_amendment BOOLEAN NOT NULL,
                legal_area TEXT,
                based_on TEXT,
                is_current BOOLEAN NOT NULL,
                indexed_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS structures (
                dok_id TEXT NOT NULL REFERENCES documents(dok_id),
                structure_type TEXT NOT NULL,
                structure_id TEXT NOT NULL,
                title TEXT NOT NULL,
                address TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                PRIMARY KEY (dok_id, ordinal)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sections (
                dok_id TEXT NOT NULL REFERENCES documents(dok_id),
                section_id TEXT NOT NULL,
                title TEXT,
                content TEXT NOT NULL,
                address TEXT NOT NULL,
                char_count INTEGER NOT NULL,
                embedding REAL[],
                PRIMARY KEY (dok_id, section_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_meta (
                dataset TEXT PRIMARY KEY,
                last_modified TIMESTAMPTZ NOT NULL,
                synced_at TIMESTAMPTZ NOT NULL,
                file_count INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_document(row: &sqlx::postgres::PgRow) -> Result<Document> {
        Ok(Document {
            dok_id: row.try_get("dok_id")?,
            ref_id: row.try_get("ref_id")?,
            title: row.try_get("title")?,
            short_title: row.try_get("short_title")?,
            date_in_force: row.try_get("date_in_force")?,
            ministry: row.try_get("ministry")?,
            doc_type: doc_type_from_str(row.try_get::<String, _>("doc_type")?.as_str()),
            is_amendment: row.try_get("is_amendment")?,
            legal_area: row.try_get("legal_area")?,
            based_on: row.try_get("based_on")?,
            is_current: row.try_get("is_current")?,
            indexed_at: row.try_get("indexed_at")?,
        })
    }

    fn row_to_section(row: &sqlx::postgres::PgRow) -> Result<Section> {
        Ok(Section {
            dok_id: row.try_get("dok_id")?,
            section_id: row.try_get("section_id")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            address: row.try_get("address")?,
            char_count: row.try_get::<i32, _>("char_count")? as usize,
            embedding: row.try_get::<Option<Vec<f32>>, _>("embedding")?,
        })
    }
}

#[async_trait]
impl Store for RelationalStore {
    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM documents
            WHERE lower(dok_id) = lower($1) OR lower(ref_id) = lower($1) OR lower(short_title) = lower($1)
            ORDER BY is_current DESC, dok_id ASC
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn find_document(&self, free_text: &str) -> Result<Option<Document>> {
        let queries: [&str; 5] = [
            "SELECT * FROM documents WHERE lower(dok_id) = lower($1) ORDER BY is_current DESC, dok_id ASC LIMIT 1",
            "SELECT * FROM documents WHERE lower(short_title) = lower($1) ORDER BY is_current DESC, dok_id ASC LIMIT 1",
            "SELECT * FROM documents WHERE lower(short_title) LIKE lower($1) || '%' ORDER BY is_current DESC, dok_id ASC LIMIT 1",
            "SELECT * FROM documents WHERE lower(short_title) LIKE '%' || lower($1) || '%' ORDER BY is_current DESC, dok_id ASC LIMIT 1",
            "SELECT * FROM documents WHERE lower(dok_id) LIKE '%' || lower($1) || '%' ORDER BY is_current DESC, dok_id ASC LIMIT 1",
        ];
        for sql in queries {
            if let Some(row) = sqlx::query(sql).bind(free_text).fetch_optional(&self.pool).await? {
                return Ok(Some(Self::row_to_document(&row)?));
            }
        }
        Ok(None)
    }

    async fn find_similar(&self, free_text: &str, threshold: f64) -> Result<Option<(Document, f64)>> {
        let rows = sqlx::query(
            "SELECT *, similarity(short_title, $1) AS sim FROM documents ORDER BY sim DESC LIMIT 1",
        )
        .bind(free_text)
        .fetch_optional(&self.pool)
        .await;

        let row = match rows {
            Ok(r) => r,
            Err(_) => return Err(SearchError::BackendUnavailable { capability: "trigram similarity (pg_trgm)".to_string() }),
        };
        match row {
            Some(row) => {
                let sim: f64 = row.try_get::<f32, _>("sim")? as f64;
                if sim >= threshold {
                    Ok(Some((Self::row_to_document(&row)?, sim)))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    async fn get_section(&self, dok_id: &str, section_id: &str) -> Result<Option<Section>> {
        let normalized = section_id.trim_start_matches('§').split_whitespace().collect::<Vec<_>>().join(" ");
        let row = sqlx::query("SELECT * FROM sections WHERE dok_id = $1 AND section_id = $2")
            .bind(dok_id)
            .bind(&normalized)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_section).transpose()
    }

    async fn get_sections_batch(&self, dok_id: &str, ids: &[String]) -> Result<Vec<Section>> {
        let rows = sqlx::query("SELECT * FROM sections WHERE dok_id = $1 AND section_id = ANY($2)")
            .bind(dok_id)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_section).collect()
    }

    async fn list_sections(&self, dok_id: &str) -> Result<Vec<SectionSummary>> {
        let rows = sqlx::query("SELECT section_id, title, char_count, address FROM sections WHERE dok_id = $1")
            .bind(dok_id)
            .fetch_all(&self.pool)
            .await?;
        let mut out: Vec<SectionSummary> = rows
            .into_iter()
            .map(|row| {
                let char_count: i32 = row.try_get("char_count")?;
                Ok(SectionSummary {
                    section_id: row.try_get("section_id")?,
                    title: row.try_get("title")?,
                    char_count: char_count as usize,
                    estimated_tokens: (char_count as f64 / 3.5).floor() as usize,
                    address: row.try_get("address")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        crate::shape::sort_sections_naturally(&mut out);
        Ok(out)
    }

    async fn list_structures(&self, dok_id: &str) -> Result<Vec<StructureNode>> {
        let rows = sqlx::query("SELECT * FROM structures WHERE dok_id = $1 ORDER BY ordinal ASC")
            .bind(dok_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(StructureNode {
                    dok_id: row.try_get("dok_id")?,
                    structure_type: structure_type_from_str(row.try_get::<String, _>("structure_type")?.as_str()),
                    structure_id: row.try_get("structure_id")?,
                    title: row.try_get("title")?,
                    address: row.try_get("address")?,
                    ordinal: row.try_get::<i32, _>("ordinal")? as usize,
                })
            })
            .collect()
    }

    async fn search_fts(&self, query: &str, limit: usize, filters: &SearchFilters) -> Result<Vec<SearchHit>> {
        let and_rows = self.run_fts_query(query, limit, filters, false).await?;
        if !and_rows.is_empty() {
            return Ok(and_rows);
        }
        self.run_fts_query(query, limit, filters, true).await
    }

    async fn search_vector(&self, embedding: &[f32], limit: usize, _probes: u32) -> Result<Vec<SearchHit>> {
        let rows = sqlx::query(
            r#"
            SELECT s.*, d.short_title, d.doc_type, d.based_on, d.legal_area, d.is_amendment
            FROM sections s JOIN documents d ON d.dok_id = s.dok_id
            WHERE s.embedding IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(f64, sqlx::postgres::PgRow)> = Vec::new();
        for row in rows {
            let section_embedding: Vec<f32> = row.try_get("embedding")?;
            let cos = crate::store::cosine_similarity(embedding, &section_embedding);
            scored.push((cos, row));
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut hits = Vec::new();
        for (cos, row) in scored.into_iter().take(limit) {
            hits.push(SearchHit {
                dok_id: row.try_get("dok_id")?,
                section_id: row.try_get("section_id")?,
                title: row.try_get("title")?,
                short_title: row.try_get("short_title")?,
                doc_type: doc_type_from_str(row.try_get::<String, _>("doc_type")?.as_str()),
                based_on: row.try_get("based_on")?,
                legal_area: row.try_get("legal_area")?,
                snippet: String::new(),
                rank: cosine_to_unit_interval(cos),
                search_mode: SearchMode::Hybrid,
            });
        }
        Ok(hits)
    }

    async fn search_hybrid(
        &self,
        query: &str,
        embedding: &[f32],
        limit: usize,
        fts_weight: f64,
        probes: u32,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        let fts_hits = self.search_fts(query, limit.max(50), filters).await?;
        let vector_hits = self.search_vector(embedding, limit.max(50), probes).await?;

        let max_fts_rank = fts_hits.iter().map(|h| h.rank).fold(0.0_f64, f64::max).max(f64::EPSILON);

        let mut combined: std::collections::HashMap<(String, String), SearchHit> = std::collections::HashMap::new();
        for hit in fts_hits {
            let normalized_rank = hit.rank / max_fts_rank;
            let mut hit = hit;
            hit.rank = hybrid_score(normalized_rank, 0.0, fts_weight);
            combined.insert((hit.dok_id.clone(), hit.section_id.clone()), hit);
        }
        for hit in vector_hits {
            let key = (hit.dok_id.clone(), hit.section_id.clone());
            let cos_unit = hit.rank;
            combined
                .entry(key)
                .and_modify(|existing| {
                    let normalized_rank = existing.rank;
                    existing.rank = hybrid_score(normalized_rank, cos_unit, fts_weight);
                    existing.search_mode = SearchMode::Hybrid;
                })
                .or_insert_with(|| {
                    let mut h = hit;
                    h.rank = hybrid_score(0.0, cos_unit, fts_weight);
                    h.search_mode = SearchMode::Hybrid;
                    h
                });
        }

        let mut out: Vec<SearchHit> = combined.into_values().collect();
        out.sort_by(|a, b| b.rank.partial_cmp(&a.rank).unwrap_or(std::cmp::Ordering::Equal));
        out.truncate(limit);
        Ok(out)
    }

    async fn find_related(&self, lov_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT * FROM documents WHERE doc_type = 'regulation' AND based_on LIKE '%' || $1 || '%'",
        )
        .bind(lov_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_document).collect()
    }

    async fn list_ministries(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT ministry FROM documents WHERE ministry IS NOT NULL ORDER BY ministry")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|r| r.try_get::<String, _>("ministry").map_err(SearchError::from)).collect()
    }

    async fn list_legal_areas(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT legal_area FROM documents WHERE legal_area IS NOT NULL ORDER BY legal_area")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|r| r.try_get::<String, _>("legal_area").map_err(SearchError::from)).collect()
    }

    async fn upsert_document(
        &self,
        document: Document,
        structures: Vec<StructureNode>,
        sections: Vec<Section>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (dok_id, ref_id, title, short_title, date_in_force, ministry,
                doc_type, is_amendment, legal_area, based_on, is_current, indexed_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            ON CONFLICT (dok_id) DO UPDATE SET
                ref_id = EXCLUDED.ref_id, title = EXCLUDED.title, short_title = EXCLUDED.short_title,
                date_in_force = EXCLUDED.date_in_force, ministry = EXCLUDED.ministry,
                doc_type = EXCLUDED.doc_type, is_amendment = EXCLUDED.is_amendment,
                legal_area = EXCLUDED.legal_area, based_on = EXCLUDED.based_on,
                is_current = EXCLUDED.is_current, indexed_at = EXCLUDED.indexed_at
            "#,
        )
        .bind(&document.dok_id)
        .bind(&document.ref_id)
        .bind(&document.title)
        .bind(&document.short_title)
        .bind(document.date_in_force)
        .bind(&document.ministry)
        .bind(doc_type_str(document.doc_type))
        .bind(document.is_amendment)
        .bind(&document.legal_area)
        .bind(&document.based_on)
        .bind(document.is_current)
        .bind(document.indexed_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM sections WHERE dok_id = $1").bind(&document.dok_id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM structures WHERE dok_id = $1").bind(&document.dok_id).execute(&mut *tx).await?;

        for section in &sections {
            sqlx::query(
                "INSERT INTO sections (dok_id, section_id, title, content, address, char_count, embedding) VALUES ($1,$2,$3,$4,$5,$6,$7)",
            )
            .bind(&document.dok_id)
            .bind(&section.section_id)
            .bind(&section.title)
            .bind(&section.content)
            .bind(&section.address)
            .bind(section.char_count as i32)
            .bind(&section.embedding)
            .execute(&mut *tx)
            .await?;
        }

        for (ordinal, node) in structures.iter().enumerate() {
            sqlx::query(
                "INSERT INTO structures (dok_id, structure_type, structure_id, title, address, ordinal) VALUES ($1,$2,$3,$4,$5,$6)",
            )
            .bind(&document.dok_id)
            .bind(structure_type_str(node.structure_type))
            .bind(&node.structure_id)
            .bind(&node.title)
            .bind(&node.address)
            .bind(ordinal as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn reconcile_current(&self, doc_type: DocType, present_ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE documents SET is_current = (dok_id = ANY($2)) WHERE doc_type = $1")
            .bind(doc_type_str(doc_type))
            .bind(present_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn rebuild_fts_index(&self) -> Result<()> {
        // Postgres FTS is maintained live via `to_tsvector` at query time in
        // `run_fts_query`; a generated/stored tsvector column with its own
        // index is a deployment-time concern (migration, not this crate).
        Ok(())
    }

    async fn get_sync_status(&self) -> Result<Vec<SyncMeta>> {
        let rows = sqlx::query("SELECT * FROM sync_meta").fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                Ok(SyncMeta {
                    dataset: row.try_get("dataset")?,
                    last_modified: row.try_get("last_modified")?,
                    synced_at: row.try_get("synced_at")?,
                    file_count: row.try_get::<i32, _>("file_count")? as usize,
                })
            })
            .collect()
    }

    async fn set_sync_status(&self, dataset: &str, remote_mtime: DateTime<Utc>, file_count: usize) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_meta (dataset, last_modified, synced_at, file_count)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (dataset) DO UPDATE SET last_modified = EXCLUDED.last_modified,
                synced_at = EXCLUDED.synced_at, file_count = EXCLUDED.file_count
            "#,
        )
        .bind(dataset)
        .bind(remote_mtime)
        .bind(Utc::now())
        .bind(file_count as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_synced(&self) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sync_meta").fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>("n")? > 0)
    }

    fn supports_vector_search(&self) -> bool {
        true
    }
}

impl RelationalStore {
    async fn run_fts_query(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
        or_fallback: bool,
    ) -> Result<Vec<SearchHit>> {
        let tsquery_fn = if or_fallback { "websearch_to_tsquery" } else { "plainto_tsquery" };
        let sql = format!(
            r#"
            SELECT s.dok_id, s.section_id, s.title, s.content, d.short_title, d.doc_type,
                   d.based_on, d.legal_area, d.is_amendment, d.ministry,
                   ts_rank(to_tsvector('simple', s.content), {tsquery_fn}('simple', $1)) AS rank
            FROM sections s JOIN documents d ON d.dok_id = s.dok_id
            WHERE to_tsvector('simple', s.content) @@ {tsquery_fn}('simple', $1)
              AND ($2::boolean IS FALSE OR d.is_amendment = FALSE)
              AND ($3::text IS NULL OR d.ministry ILIKE '%' || $3 || '%')
              AND ($4::text IS NULL OR d.doc_type = $4)
              AND ($5::text IS NULL OR d.legal_area ILIKE '%' || $5 || '%')
            ORDER BY rank DESC
            LIMIT $6
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(query)
            .bind(filters.exclude_amendments_or_default())
            .bind(&filters.ministry)
            .bind(filters.doc_type.map(doc_type_str))
            .bind(&filters.legal_area)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let tokens: Vec<String> = query.split_whitespace().map(|t| t.to_lowercase()).collect();
        let mode = if or_fallback { SearchMode::OrFallback } else { SearchMode::And };
        rows.into_iter()
            .map(|row| {
                let content: String = row.try_get("content")?;
                let snippet = crate::shape::highlight_snippet(
                    &content.chars().take(240).collect::<String>(),
                    &tokens.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
                );
                Ok(SearchHit {
                    dok_id: row.try_get("dok_id")?,
                    section_id: row.try_get("section_id")?,
                    title: row.try_get("title")?,
                    short_title: row.try_get("short_title")?,
                    doc_type: doc_type_from_str(row.try_get::<String, _>("doc_type")?.as_str()),
                    based_on: row.try_get("based_on")?,
                    legal_area: row.try_get("legal_area")?,
                    snippet,
                    rank: row.try_get::<f32, _>("rank")? as f64,
                    search_mode: mode,
                })
            })
            .collect()
    }
}
