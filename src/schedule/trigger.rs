// backuptool/src/schedule/trigger.rs
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime, TimeZone, Weekday};
use std::fmt;
use std::time::Duration;

/// When a scheduled job wakes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Daily(NaiveTime),
    Weekly(Weekday, NaiveTime),
    Every(Duration),
}

impl Trigger {
    /// First fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Local>) -> DateTime<Local> {
        match *self {
            Trigger::Daily(at) => {
                let today = now.date_naive().and_time(at);
                let candidate = localize(today);
                if candidate > now {
                    candidate
                } else {
                    localize(today + ChronoDuration::days(1))
                }
            }
            Trigger::Weekly(weekday, at) => {
                let days_ahead = (7 + i64::from(weekday.num_days_from_monday())
                    - i64::from(now.weekday().num_days_from_monday()))
                    % 7;
                let naive = now.date_naive().and_time(at) + ChronoDuration::days(days_ahead);
                let candidate = localize(naive);
                if candidate > now {
                    candidate
                } else {
                    localize(naive + ChronoDuration::days(7))
                }
            }
            Trigger::Every(period) => {
                let period = ChronoDuration::from_std(period).unwrap_or_else(|_| ChronoDuration::days(365));
                now.checked_add_signed(period).unwrap_or(now)
            }
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Daily(at) => write!(f, "every day at {}", at.format("%H:%M")),
            Trigger::Weekly(day, at) => write!(f, "every {} at {}", day, at.format("%H:%M")),
            Trigger::Every(period) => write!(f, "every {}s", period.as_secs()),
        }
    }
}

/// Maps a wall-clock time to the local zone. Ambiguous times take the earlier
/// instant; times inside a DST gap move forward an hour.
fn localize(naive: NaiveDateTime) -> DateTime<Local> {
    match Local.from_local_datetime(&naive).earliest() {
        Some(dt) => dt,
        None => {
            let shifted = naive + ChronoDuration::hours(1);
            Local
                .from_local_datetime(&shifted)
                .earliest()
                .unwrap_or_else(|| Local.from_utc_datetime(&naive))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        localize(
            chrono::NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, min, 0)
                .unwrap(),
        )
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_daily_later_today_or_tomorrow() {
        let trigger = Trigger::Daily(hm(13, 0));

        let before = local(2024, 1, 10, 9, 30);
        assert_eq!(trigger.next_after(before), local(2024, 1, 10, 13, 0));

        let exactly = local(2024, 1, 10, 13, 0);
        assert_eq!(trigger.next_after(exactly), local(2024, 1, 11, 13, 0));

        let after = local(2024, 1, 10, 18, 0);
        assert_eq!(trigger.next_after(after), local(2024, 1, 11, 13, 0));
    }

    #[test]
    fn test_weekly_finds_next_matching_weekday() {
        let trigger = Trigger::Weekly(Weekday::Wed, hm(15, 45));

        // 2024-01-08 is a Monday.
        let monday = local(2024, 1, 8, 10, 0);
        let next = trigger.next_after(monday);
        assert_eq!(next, local(2024, 1, 10, 15, 45));
        assert_eq!(next.weekday(), Weekday::Wed);

        let wednesday_after = local(2024, 1, 10, 16, 0);
        assert_eq!(trigger.next_after(wednesday_after), local(2024, 1, 17, 15, 45));

        let wednesday_before = local(2024, 1, 10, 15, 44);
        assert_eq!(trigger.next_after(wednesday_before), local(2024, 1, 10, 15, 45));
    }

    #[test]
    fn test_weekly_wraps_past_sunday() {
        let trigger = Trigger::Weekly(Weekday::Mon, hm(8, 0));
        // 2024-01-13 is a Saturday.
        let next = trigger.next_after(local(2024, 1, 13, 12, 0));
        assert_eq!(next, local(2024, 1, 15, 8, 0));
        assert_eq!(next.hour(), 8);
    }

    #[test]
    fn test_every_adds_period() {
        let trigger = Trigger::Every(Duration::from_secs(60));
        let now = local(2024, 1, 10, 9, 30);
        assert_eq!(trigger.next_after(now), local(2024, 1, 10, 9, 31));
    }
}
