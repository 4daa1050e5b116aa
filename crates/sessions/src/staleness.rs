//! When a cached session must be thrown away before reuse.

use std::time::Duration;

use {
    chrono::{DateTime, Days, NaiveTime, TimeZone, Utc},
    chrono_tz::Tz,
    courier_config::{ResetConfig, ResetMode},
    tracing::warn,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StalenessPolicy {
    /// Sessions live until reset explicitly.
    #[default]
    Manual,
    /// Sessions expire at `at_hour` local time every day.
    Daily { at_hour: u32, tz: Tz },
    /// Sessions expire after `threshold` without activity.
    Idle { threshold: Duration },
}

impl StalenessPolicy {
    #[must_use]
    pub fn from_config(cfg: &ResetConfig) -> Self {
        match cfg.mode {
            ResetMode::Manual => Self::Manual,
            ResetMode::Idle => Self::Idle {
                threshold: Duration::from_secs(cfg.idle_minutes.saturating_mul(60)),
            },
            ResetMode::Daily => {
                let tz = match cfg.timezone.as_deref() {
                    None => Tz::UTC,
                    Some(name) => name.parse().unwrap_or_else(|_| {
                        warn!(timezone = name, "unknown timezone for daily reset, using UTC");
                        Tz::UTC
                    }),
                };
                Self::Daily {
                    at_hour: u32::from(cfg.at_hour.min(23)),
                    tz,
                }
            },
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Daily { .. } => "daily",
            Self::Idle { .. } => "idle",
        }
    }

    #[must_use]
    pub fn is_stale(&self, last_active: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match *self {
            Self::Manual => false,
            Self::Idle { threshold } => (now - last_active)
                .to_std()
                .is_ok_and(|elapsed| elapsed > threshold),
            Self::Daily { at_hour, tz } => {
                last_reset(at_hour, tz, now).is_some_and(|reset| last_active < reset)
            },
        }
    }
}

/// The most recent daily reset boundary at or before `now`.
fn last_reset(at_hour: u32, tz: Tz, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let local_now = now.with_timezone(&tz);
    let at = NaiveTime::from_hms_opt(at_hour, 0, 0)?;
    let today = local_now.date_naive();
    let date = if local_now.time() >= at {
        today
    } else {
        today.checked_sub_days(Days::new(1))?
    };
    let naive = date.and_time(at);
    // A reset hour that falls into a DST gap moves to the first valid instant.
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn manual_never_stale() {
        let policy = StalenessPolicy::Manual;
        assert!(!policy.is_stale(utc("2020-01-01T00:00:00Z"), utc("2026-01-01T00:00:00Z")));
    }

    #[rstest]
    #[case("2026-03-10T09:00:00Z", "2026-03-10T09:59:00Z", false)]
    #[case("2026-03-10T09:00:00Z", "2026-03-10T10:00:00Z", false)]
    #[case("2026-03-10T09:00:00Z", "2026-03-10T10:00:01Z", true)]
    fn idle_threshold(#[case] last: &str, #[case] now: &str, #[case] stale: bool) {
        let policy = StalenessPolicy::Idle {
            threshold: Duration::from_secs(3_600),
        };
        assert_eq!(policy.is_stale(utc(last), utc(now)), stale);
    }

    #[rstest]
    // before today's reset hour: compare against yesterday 04:00
    #[case("2026-03-10T03:00:00Z", "2026-03-10T03:30:00Z", false)]
    #[case("2026-03-09T03:59:00Z", "2026-03-10T03:30:00Z", true)]
    // after today's reset hour
    #[case("2026-03-10T03:59:00Z", "2026-03-10T04:00:00Z", true)]
    #[case("2026-03-10T04:00:00Z", "2026-03-10T23:00:00Z", false)]
    fn daily_utc(#[case] last: &str, #[case] now: &str, #[case] stale: bool) {
        let policy = StalenessPolicy::Daily {
            at_hour: 4,
            tz: Tz::UTC,
        };
        assert_eq!(policy.is_stale(utc(last), utc(now)), stale);
    }

    #[test]
    fn daily_respects_timezone() {
        // 04:00 in Berlin (CET, UTC+1) is 03:00Z.
        let policy = StalenessPolicy::Daily {
            at_hour: 4,
            tz: "Europe/Berlin".parse().unwrap(),
        };
        let now = utc("2026-01-15T03:30:00Z");
        assert!(policy.is_stale(utc("2026-01-15T02:30:00Z"), now));
        assert!(!policy.is_stale(utc("2026-01-15T03:10:00Z"), now));
    }

    #[test]
    fn from_config_falls_back_to_utc() {
        let cfg = ResetConfig {
            mode: ResetMode::Daily,
            at_hour: 30,
            idle_minutes: 0,
            timezone: Some("Mars/Olympus".into()),
        };
        assert_eq!(StalenessPolicy::from_config(&cfg), StalenessPolicy::Daily {
            at_hour: 23,
            tz: Tz::UTC
        });

        let cfg = ResetConfig {
            mode: ResetMode::Idle,
            idle_minutes: 15,
            ..Default::default()
        };
        assert_eq!(StalenessPolicy::from_config(&cfg), StalenessPolicy::Idle {
            threshold: Duration::from_secs(900)
        });
    }
}
