//! # Lovdata Source Client
//!
//! §6's source protocol: `GET {base}/v1/publicData/list` (listing) and
//! `GET {base}/v1/publicData/get/{filename}` (archive download).
//! Grounded on the donor's `ingestion/sources/cap.rs` (a `reqwest::Client`
//! held behind a config struct, request-level timeout) but stripped of
//! the donor's rate limiter and pagination — this protocol has neither;
//! retry/backoff lives one layer up in `pipeline.rs`.

use crate::errors::{Result, SearchError};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Deserialize)]
pub struct ListingEntry {
    pub filename: String,
    #[serde(rename = "lastModified")]
    pub last_modified: DateTime<Utc>,
}

/// Dataset name accepted on the admin CLI, mapped to its archive filename.
pub fn archive_filename(dataset: &str) -> Result<&'static str> {
    match dataset {
        "lover" => Ok("gjeldende-lover.tar.bz2"),
        "forskrifter" => Ok("gjeldende-sentrale-forskrifter.tar.bz2"),
        other => Err(SearchError::InvalidInput(format!("unknown dataset: {}", other))),
    }
}

pub struct LovdataSource {
    client: reqwest::Client,
    base_url: String,
    download_timeout: Duration,
}

impl LovdataSource {
    pub fn new(base_url: String, request_timeout: Duration, download_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, base_url, download_timeout })
    }

    pub async fn list(&self) -> Result<Vec<ListingEntry>> {
        let url = format!("{}/v1/publicData/list", self.base_url);
        let response = self.client.get(&url).send().await?;
        let response = response.error_for_status()?;
        Ok(response.json().await?)
    }

    pub fn find_entry<'a>(entries: &'a [ListingEntry], filename: &str) -> Option<&'a ListingEntry> {
        entries.iter().find(|e| e.filename == filename)
    }

    /// Streams the archive to `dest`, never materializing it fully in memory.
    pub async fn download(&self, filename: &str, dest: &Path) -> Result<()> {
        let url = format!("{}/v1/publicData/get/{}", self.base_url, filename);
        let response = tokio::time::timeout(self.download_timeout, self.client.get(&url).send())
            .await
            .map_err(|_| SearchError::Transient(format!("download of {} timed out", filename)))??;
        let response = response.error_for_status()?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        use futures::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_dataset_names() {
        assert_eq!(archive_filename("lover").unwrap(), "gjeldende-lover.tar.bz2");
        assert_eq!(archive_filename("forskrifter").unwrap(), "gjeldende-sentrale-forskrifter.tar.bz2");
    }

    #[test]
    fn rejects_unknown_dataset_name() {
        assert!(archive_filename("rettsavgjorelser").is_err());
    }
}
