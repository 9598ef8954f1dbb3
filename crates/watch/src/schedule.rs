//! Cron-driven cycle loop.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tracing::{error, info, warn};

use crate::pipeline::Pipeline;

/// Parse a cron expression, auto-prepending "0 " for 5-field expressions.
///
/// The `cron` crate requires 6 fields (sec min hr dom mon dow), but users
/// typically write 5-field cron (min hr dom mon dow).
pub fn parse_cron(expr: &str) -> Result<Schedule, cron::error::Error> {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        Schedule::from_str(&format!("0 {trimmed}"))
    } else {
        Schedule::from_str(trimmed)
    }
}

/// Time from `now` until the next tick, or `None` if the schedule has no
/// upcoming tick.
pub fn next_delay(schedule: &Schedule, now: DateTime<Utc>) -> Option<Duration> {
    let next = schedule.after(&now).next()?;
    Some((next - now).to_std().unwrap_or(Duration::ZERO))
}

/// Run one cycle right away, then one per schedule tick until `shutdown`
/// resolves. After a failed cycle the next attempt comes `retry_delay`
/// later instead of waiting for the tick.
pub async fn run_scheduled<S>(pipeline: &Pipeline, schedule: &Schedule, retry_delay: Duration, shutdown: S)
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        let wait = match pipeline.run_cycle().await {
            Ok(_) => match next_delay(schedule, Utc::now()) {
                Some(wait) => wait,
                None => {
                    warn!("schedule has no upcoming tick; stopping");
                    return;
                }
            },
            Err(e) => {
                error!(error = %e, storage = e.is_storage(), retry_in_secs = retry_delay.as_secs(), "cycle failed");
                retry_delay
            }
        };

        info!(next_in_secs = wait.as_secs(), "waiting for next cycle");
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = &mut shutdown => {
                info!("shutdown requested");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_cron_six_field() {
        let schedule = parse_cron("0 */5 * * * *").unwrap();
        assert!(schedule.upcoming(Utc).next().is_some());
    }

    #[test]
    fn test_parse_cron_five_field_auto_prefix() {
        let schedule = parse_cron("*/30 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 1, 12, 10, 0).unwrap();
        let next = schedule.after(&now).next().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 10, 1, 12, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_cron_invalid() {
        assert!(parse_cron("not a cron").is_err());
    }

    #[test]
    fn next_delay_counts_to_the_next_tick() {
        let schedule = parse_cron("*/30 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 1, 12, 29, 30).unwrap();
        assert_eq!(next_delay(&schedule, now), Some(Duration::from_secs(30)));
    }

    #[test]
    fn next_delay_none_for_past_only_schedule() {
        let schedule = parse_cron("0 0 0 1 1 * 2020").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
        assert_eq!(next_delay(&schedule, now), None);
    }
}
