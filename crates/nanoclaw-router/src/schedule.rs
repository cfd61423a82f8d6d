use std::str::FromStr;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use nanoclaw_types::ScheduleKind;

/// Validate a schedule at creation time: cron expressions must parse,
/// intervals must be positive integer milliseconds, one-shot instants must
/// be RFC 3339.
pub fn validate_schedule(kind: ScheduleKind, value: &str) -> anyhow::Result<()> {
    match kind {
        ScheduleKind::Cron => {
            parse_cron(value)?;
            Ok(())
        }
        ScheduleKind::Interval => {
            let ms: i64 = value
                .trim()
                .parse()
                .with_context(|| format!("interval `{value}` is not an integer"))?;
            if ms <= 0 {
                bail!("interval must be positive milliseconds, got {ms}");
            }
            Ok(())
        }
        ScheduleKind::Once => {
            DateTime::parse_from_rfc3339(value.trim())
                .with_context(|| format!("one-shot timestamp `{value}` is not RFC 3339"))?;
            Ok(())
        }
    }
}

/// Next fire instant for a schedule, evaluated at `now`. `None` only for a
/// one-shot whose instant already passed (the caller completes the task
/// after firing it).
pub fn next_run(
    kind: ScheduleKind,
    value: &str,
    now: DateTime<Utc>,
    timezone: Tz,
) -> anyhow::Result<Option<DateTime<Utc>>> {
    match kind {
        ScheduleKind::Cron => {
            let schedule = parse_cron(value)?;
            let next = schedule
                .after(&now.with_timezone(&timezone))
                .next()
                .map(|t| t.with_timezone(&Utc));
            Ok(next)
        }
        ScheduleKind::Interval => {
            let ms: i64 = value.trim().parse().context("interval parse")?;
            if ms <= 0 {
                bail!("interval must be positive");
            }
            Ok(Some(now + chrono::Duration::milliseconds(ms)))
        }
        ScheduleKind::Once => {
            let instant = DateTime::parse_from_rfc3339(value.trim())
                .context("one-shot timestamp parse")?
                .with_timezone(&Utc);
            Ok(if instant > now { Some(instant) } else { None })
        }
    }
}

/// Accept classic 5-field expressions by prepending the seconds column the
/// cron crate expects.
fn parse_cron(expression: &str) -> anyhow::Result<Schedule> {
    let trimmed = expression.trim();
    let fields = trimmed.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    Schedule::from_str(&normalized)
        .with_context(|| format!("cron expression `{expression}` does not parse"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn five_field_cron_is_accepted() {
        assert!(validate_schedule(ScheduleKind::Cron, "0 9 * * *").is_ok());
        assert!(validate_schedule(ScheduleKind::Cron, "*/5 * * * *").is_ok());
        assert!(validate_schedule(ScheduleKind::Cron, "not a cron").is_err());
    }

    #[test]
    fn interval_must_be_positive_integer_ms() {
        assert!(validate_schedule(ScheduleKind::Interval, "60000").is_ok());
        assert!(validate_schedule(ScheduleKind::Interval, "0").is_err());
        assert!(validate_schedule(ScheduleKind::Interval, "-5").is_err());
        assert!(validate_schedule(ScheduleKind::Interval, "soon").is_err());
    }

    #[test]
    fn once_must_be_rfc3339() {
        assert!(validate_schedule(ScheduleKind::Once, "2030-01-02T09:00:00Z").is_ok());
        assert!(validate_schedule(ScheduleKind::Once, "tomorrow").is_err());
    }

    #[test]
    fn cron_next_run_lands_on_nine_in_the_zone() {
        let tz: Tz = "Europe/Berlin".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let next = next_run(ScheduleKind::Cron, "0 9 * * *", now, tz)
            .unwrap()
            .unwrap();
        let local = next.with_timezone(&tz);
        assert_eq!(local.hour(), 9);
        assert_eq!(local.minute(), 0);
        assert!(next > now);
    }

    #[test]
    fn interval_next_run_adds_milliseconds() {
        let now = Utc::now();
        let next = next_run(ScheduleKind::Interval, "90000", now, chrono_tz::UTC)
            .unwrap()
            .unwrap();
        assert_eq!((next - now).num_milliseconds(), 90_000);
    }

    #[test]
    fn past_one_shot_yields_none() {
        let now = Utc::now();
        let past = (now - chrono::Duration::hours(1)).to_rfc3339();
        assert!(next_run(ScheduleKind::Once, &past, now, chrono_tz::UTC)
            .unwrap()
            .is_none());
        let future = (now + chrono::Duration::hours(1)).to_rfc3339();
        assert!(next_run(ScheduleKind::Once, &future, now, chrono_tz::UTC)
            .unwrap()
            .is_some());
    }
}
