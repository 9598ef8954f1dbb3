/// Integration tests for the dedup store covering the acceptance scenarios,
/// idempotent re-ingestion, merge/partition properties, and concurrent callers.

mod helpers;
mod properties;
mod scenarios;
