//! Listing ingestion: fetching raw vacancy pages and shaping them into
//! candidate batches for the dedup store.
//!
//! - [`ListingSource`] is the fetch collaborator interface
//! - [`HhApiSource`] pulls pages from the hh.ru public vacancies API
//! - [`Normalizer`] validates raw records and coerces known fields

pub mod normalizer;
pub mod source;

pub use normalizer::{Normalized, Normalizer, SkipReason, Skipped};
pub use source::{HhApiSource, ListingSource, RawBatch, SourceError};
