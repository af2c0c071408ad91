//! # Ingestor
//!
//! §4.C: per-dataset sync orchestration — list, compare `lastModified`,
//! download, iterate archive entries through the Parser, upsert each
//! document, reconcile, rebuild the lexical index, write `SyncMeta`.
//! Grounded on the donor's `ingestion/pipeline.rs` (`IngestionPipeline`:
//! an owned struct holding the store/processor/stats handles, a
//! `run_ingestion` entry point, per-batch processing with a semaphore)
//! generalized from the donor's CaseMetadata/TextProcessor pipeline to
//! this crate's Document/Parser/Store pipeline, and on
//! `original_source/_supabase_utils.py`'s retry-with-backoff helper for
//! the exponential backoff + jitter policy of §4.C.

use crate::config::IngestionConfig;
use crate::domain::DocType;
use crate::errors::{Result, SearchError};
use crate::ingestion::source::{archive_filename, LovdataSource};
use crate::parser::Parser;
use crate::store::Store;
use bzip2::read::BzDecoder;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of syncing one dataset.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub dataset: String,
    pub up_to_date: bool,
    pub documents_indexed: usize,
    pub documents_skipped: usize,
}

pub struct Ingestor {
    store: Arc<dyn Store>,
    source: LovdataSource,
    parser: Parser,
    config: IngestionConfig,
}

impl Ingestor {
    pub fn new(store: Arc<dyn Store>, config: IngestionConfig) -> Result<Self> {
        let source = LovdataSource::new(
            config.source_base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
            Duration::from_secs(config.download_timeout_secs),
        )?;
        Ok(Self { store, source, parser: Parser::new(), config })
    }

    pub async fn sync_dataset(&self, dataset: &str, force: bool) -> Result<SyncReport> {
        let filename = archive_filename(dataset)?;
        let doc_type = if dataset == "lover" { DocType::Law } else { DocType::Regulation };

        let entries = self.with_retry(|| self.source.list()).await?;
        let entry = LovdataSource::find_entry(&entries, filename)
            .ok_or_else(|| SearchError::Permanent(format!("{} missing from source listing", filename)))?;

        if !force {
            let current = self.store.get_sync_status().await?;
            if let Some(meta) = current.iter().find(|m| m.dataset == dataset) {
                if meta.last_modified >= entry.last_modified {
                    info!(dataset, "up to date, skipping download");
                    return Ok(SyncReport {
                        dataset: dataset.to_string(),
                        up_to_date: true,
                        documents_indexed: meta.file_count,
                        documents_skipped: 0,
                    });
                }
            }
        }

        let temp_dir = tempfile::tempdir()?;
        let archive_path = temp_dir.path().join(filename);
        self.with_retry(|| self.source.download(filename, &archive_path)).await?;

        let (indexed, skipped, present_ids) = self.ingest_archive(&archive_path).await?;

        self.store.reconcile_current(doc_type, &present_ids).await?;
        self.store.rebuild_fts_index().await?;
        self.store.set_sync_status(dataset, entry.last_modified, indexed).await?;

        info!(dataset, indexed, skipped, "sync complete");
        Ok(SyncReport { dataset: dataset.to_string(), up_to_date: false, documents_indexed: indexed, documents_skipped: skipped })
    }

    /// Iterates the downloaded `tar.bz2` stream entry by entry without fully
    /// materializing it in memory; per-document parse/upsert failures are
    /// logged and skipped, not fatal to the dataset.
    async fn ingest_archive(&self, archive_path: &std::path::Path) -> Result<(usize, usize, Vec<String>)> {
        let file = std::fs::File::open(archive_path)?;
        let decoder = BzDecoder::new(file);
        let mut archive = tar::Archive::new(decoder);

        let mut indexed = 0;
        let mut skipped = 0;
        let mut present_ids = Vec::new();

        for entry in archive.entries()? {
            let mut entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    warn!(error = %err, "failed to read archive entry, skipping");
                    skipped += 1;
                    continue;
                }
            };
            let path = entry.path()?.to_path_buf();
            if path.extension().and_then(|e| e.to_str()) != Some("xml") {
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_string();

            let mut contents = String::new();
            if let Err(err) = entry.read_to_string(&mut contents) {
                warn!(stem, error = %err, "unreadable archive entry, skipping");
                skipped += 1;
                continue;
            }

            match self.parser.parse(&contents, &stem) {
                Ok((document, structures, sections)) => {
                    let dok_id = document.dok_id.clone();
                    match self.store.upsert_document(document, structures, sections).await {
                        Ok(()) => {
                            present_ids.push(dok_id);
                            indexed += 1;
                        }
                        Err(err) => {
                            warn!(stem, error = %err, "upsert failed, skipping document");
                            skipped += 1;
                        }
                    }
                }
                Err(err) => {
                    warn!(stem, error = %err, "parse failed, skipping document");
                    skipped += 1;
                }
            }
        }

        Ok((indexed, skipped, present_ids))
    }

    /// Exponential backoff with jitter: base 0.5s, cap 30s, `max_attempts`
    /// tries. Only `is_retryable()` errors are retried; everything else
    /// returns immediately.
    async fn with_retry<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.config.max_attempts => {
                    let backoff = (self.config.backoff_base_secs * 2f64.powi(attempt as i32 - 1))
                        .min(self.config.backoff_max_secs);
                    let delay = if self.config.jitter { backoff * (0.5 + jitter_fraction()) } else { backoff };
                    debug!(attempt, delay_secs = delay, error = %err, "retrying after transient failure");
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// A cheap `[0, 1)` jitter source. No randomness crate is pulled in for a
/// single scalar; the low bits of the wall clock are uniform enough for
/// spreading out retries.
fn jitter_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_fraction_stays_in_unit_interval() {
        for _ in 0..10 {
            let f = jitter_fraction();
            assert!((0.0..1.0).contains(&f));
        }
    }
}
