//! # Ingestion
//!
//! §4.C: syncing the two Lovdata datasets (`lover`, `forskrifter`) into
//! whichever `Store` backend is configured. Replaces the donor's
//! multi-source (CAP/CourtListener) ingestion manager with the single
//! Lovdata source this domain actually has; see DESIGN.md for the
//! donor modules trimmed in consequence.

pub mod pipeline;
pub mod source;

pub use pipeline::{Ingestor, SyncReport};
pub use source::{ListingEntry, LovdataSource};
