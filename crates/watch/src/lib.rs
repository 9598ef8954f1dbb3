//! Polling worker: fetch → normalize → dedup → notify.
//!
//! [`Pipeline::run_cycle`] performs one pass; [`schedule`] repeats it on a
//! cron schedule with a retry delay after failed cycles.

pub mod pipeline;
pub mod schedule;

pub use pipeline::{CycleReport, Pipeline, WatchError};
pub use schedule::{next_delay, parse_cron, run_scheduled};
