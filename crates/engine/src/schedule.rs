//! Next-run computation for recurring workflows.
//!
//! All arithmetic is done in UTC.  The functions are total: malformed config
//! values fall back to their defaults and an unknown schedule type runs again
//! one hour from `now`.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use effects::DataMap;

use crate::value;

const DEFAULT_HOUR: u32 = 9;
const DEFAULT_DAY_OF_WEEK: i64 = 1;
const DEFAULT_INTERVAL_MINUTES: i64 = 60;
/// Ten years; keeps `now + interval` well inside chrono's range.
const MAX_INTERVAL_MINUTES: i64 = 10 * 366 * 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Daily,
    Weekly,
    Monthly,
    Interval,
}

impl ScheduleType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "interval" => Some(Self::Interval),
            _ => None,
        }
    }

    /// The first firing time after `now` (at `now` for a zero interval).
    pub fn next_run(self, config: &DataMap, now: DateTime<Utc>) -> DateTime<Utc> {
        let computed = match self {
            Self::Daily => Some(daily(config, now)),
            Self::Weekly => Some(weekly(config, now)),
            Self::Monthly => monthly(config, now),
            Self::Interval => Some(interval(config, now)),
        };
        computed.unwrap_or_else(|| fallback(now))
    }
}

/// Next firing time for `schedule_type`; unknown types fire in one hour.
pub fn next_run(schedule_type: &str, config: &DataMap, now: DateTime<Utc>) -> DateTime<Utc> {
    match ScheduleType::parse(schedule_type) {
        Some(kind) => kind.next_run(config, now),
        None => fallback(now),
    }
}

fn fallback(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::hours(1)
}

/// `config.time` as `HH:MM`, 09:00 when absent or malformed.
fn time_of_day(config: &DataMap) -> NaiveTime {
    value::string(config, "time")
        .and_then(|s| {
            let (h, m) = s.trim().split_once(':')?;
            NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)
        })
        .or_else(|| NaiveTime::from_hms_opt(DEFAULT_HOUR, 0, 0))
        .unwrap_or_default()
}

fn at(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    date.and_time(time).and_utc()
}

fn daily(config: &DataMap, now: DateTime<Utc>) -> DateTime<Utc> {
    let candidate = at(now.date_naive(), time_of_day(config));
    if candidate <= now {
        candidate + Duration::days(1)
    } else {
        candidate
    }
}

/// A matching weekday always moves to next week, even when the time of day
/// is still ahead.
fn weekly(config: &DataMap, now: DateTime<Utc>) -> DateTime<Utc> {
    let target = value::integer(config, "day_of_week")
        .filter(|d| (0..=6).contains(d))
        .unwrap_or(DEFAULT_DAY_OF_WEEK);
    let today = i64::from(now.weekday().num_days_from_sunday());
    let delta = match (target - today + 7) % 7 {
        0 => 7,
        d => d,
    };
    at(now.date_naive() + Duration::days(delta), time_of_day(config))
}

/// Days past the end of a month clamp to its last day.
fn monthly(config: &DataMap, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let day = value::integer(config, "day_of_month").unwrap_or(1).clamp(1, 31) as u32;
    let time = time_of_day(config);

    let this_month = on_day(now.year(), now.month(), day, time)?;
    if this_month > now {
        return Some(this_month);
    }
    let (year, month) = following_month(now.year(), now.month());
    on_day(year, month, day, time)
}

fn following_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn on_day(year: i32, month: u32, day: u32, time: NaiveTime) -> Option<DateTime<Utc>> {
    let (next_year, next_month) = following_month(year, month);
    let last = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?.day();
    NaiveDate::from_ymd_opt(year, month, day.min(last)).map(|d| at(d, time))
}

fn interval(config: &DataMap, now: DateTime<Utc>) -> DateTime<Utc> {
    let minutes = value::integer(config, "interval_minutes")
        .filter(|m| *m >= 0)
        .unwrap_or(DEFAULT_INTERVAL_MINUTES)
        .min(MAX_INTERVAL_MINUTES);
    now + Duration::minutes(minutes)
}
