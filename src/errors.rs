//! # Error Handling Module
//!
//! ## Purpose
//! A single error type covering every failure this crate can surface,
//! organized around the six-kind taxonomy the rest of the crate is
//! built against: `Transient`, `RateLimited`, `Permanent`, `NotFound`,
//! `InvalidInput`, `BackendUnavailable`.
//!
//! Lower-level errors (I/O, the embedded store, the relational
//! driver, JSON/TOML decoding, the HTTP client) convert into this type
//! via `From`, each mapped to the closest-fitting kind so retry policy
//! and logging can be driven by `category()`/`is_retryable()` instead
//! of re-deriving it at each call site.

use std::time::Duration;
use thiserror::Error;

/// Result type used throughout the application
pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Debug, Error)]
pub enum SearchError {
    /// Network/timeout/5xx/429-without-clear-retry-after failures. Retried by
    /// the caller with exponential backoff.
    #[error("transient failure: {0}")]
    Transient(String),

    /// 429 with an optional `Retry-After` hint.
    #[error("rate limited{}", retry_after.map(|d| format!(", retry after {}s", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    /// 4xx (other than 429), auth failures, uniqueness violations. Never retried.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// A document or section does not exist. Never propagated as an error to
    /// the query engine's callers; folded into a formatted message instead.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller-supplied input is invalid (empty id, oversized batch, empty query).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The configured backend lacks a capability the requested operation needs
    /// (e.g. vector search against the embedded backend).
    #[error("backend unavailable: {capability}")]
    BackendUnavailable { capability: String },
}

impl SearchError {
    /// Whether the retry layer should retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SearchError::Transient(_) | SearchError::RateLimited { .. })
    }

    /// Error category for logging/metrics grouping.
    pub fn category(&self) -> &'static str {
        match self {
            SearchError::Transient(_) => "transient",
            SearchError::RateLimited { .. } => "rate_limited",
            SearchError::Permanent(_) => "permanent",
            SearchError::NotFound(_) => "not_found",
            SearchError::InvalidInput(_) => "invalid_input",
            SearchError::BackendUnavailable { .. } => "backend_unavailable",
        }
    }

    /// Render the user-facing "**Feil:** ..." message the query engine emits
    /// for every non-Found outcome, including a next-step hint.
    pub fn to_user_message(&self) -> String {
        match self {
            SearchError::NotFound(what) => {
                format!("**Feil:** {} finnes ikke. Prøv `search` for å finne riktig dokument.", what)
            }
            SearchError::InvalidInput(reason) => {
                format!("**Feil:** Ugyldig forespørsel: {}.", reason)
            }
            SearchError::BackendUnavailable { capability } => {
                format!(
                    "**Feil:** Denne funksjonen ({}) krever en backend som ikke er konfigurert.",
                    capability
                )
            }
            SearchError::RateLimited { .. } => {
                "**Feil:** Tjenesten er midlertidig overbelastet. Prøv igjen om litt.".to_string()
            }
            SearchError::Transient(_) => {
                "**Feil:** Midlertidig feil ved oppslag. Prøv igjen.".to_string()
            }
            SearchError::Permanent(reason) => {
                format!("**Feil:** {}.", reason)
            }
        }
    }
}

impl From<std::io::Error> for SearchError {
    fn from(err: std::io::Error) -> Self {
        SearchError::Transient(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Permanent(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for SearchError {
    fn from(err: toml::de::Error) -> Self {
        SearchError::Permanent(format!("TOML decode error: {}", err))
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            SearchError::Transient(err.to_string())
        } else if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                SearchError::RateLimited { retry_after: None }
            } else if status.is_server_error() {
                SearchError::Transient(err.to_string())
            } else {
                SearchError::Permanent(err.to_string())
            }
        } else {
            SearchError::Transient(err.to_string())
        }
    }
}

impl From<bincode::Error> for SearchError {
    fn from(err: bincode::Error) -> Self {
        SearchError::Permanent(format!("serialization error: {}", err))
    }
}

impl From<sled::Error> for SearchError {
    fn from(err: sled::Error) -> Self {
        SearchError::Transient(format!("embedded store error: {}", err))
    }
}

impl From<sqlx::Error> for SearchError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => SearchError::NotFound("row".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                SearchError::Permanent(format!("uniqueness violation: {}", db_err))
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                SearchError::Transient(err.to_string())
            }
            _ => SearchError::Transient(err.to_string()),
        }
    }
}
