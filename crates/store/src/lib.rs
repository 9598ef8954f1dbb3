//! Durable deduplication store for scraped vacancy listings.
//!
//! [`DedupStore`] is the single writer of the listing table. It answers
//! "which of these listings are new", merges the new ones into the table
//! with an atomic file replace, and keeps the most recent undelivered
//! delta so a crash before notification does not lose it.

pub mod backend;
pub mod dedup;
pub mod error;
pub mod pending;

pub use backend::{JsonFileBackend, TableBackend};
pub use dedup::{DedupStore, MergeOutcome};
pub use error::StoreError;
pub use pending::{PendingDelta, Receipts};
