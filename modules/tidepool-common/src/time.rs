//! Half-open UTC windows with day boundaries resolved in the display
//! time zone. Storage and comparison are always UTC; the zone only decides
//! where a "day" starts.

use anyhow::{bail, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Four-bucket local-clock histogram used by profiles and the ranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    /// 06-12 morning, 12-18 afternoon, 18-22 evening, else night.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => Self::Morning,
            12..=17 => Self::Afternoon,
            18..=21 => Self::Evening,
            _ => Self::Night,
        }
    }

    /// Bucket an absolute instant by the local clock in `tz`.
    pub fn bucket(at: DateTime<Utc>, tz: Tz) -> Self {
        Self::from_hour(at.with_timezone(&tz).hour())
    }

    pub const ALL: [TimeOfDay; 4] = [
        TimeOfDay::Morning,
        TimeOfDay::Afternoon,
        TimeOfDay::Evening,
        TimeOfDay::Night,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub fn from_weekday(w: chrono::Weekday) -> Self {
        match w {
            chrono::Weekday::Mon => Self::Monday,
            chrono::Weekday::Tue => Self::Tuesday,
            chrono::Weekday::Wed => Self::Wednesday,
            chrono::Weekday::Thu => Self::Thursday,
            chrono::Weekday::Fri => Self::Friday,
            chrono::Weekday::Sat => Self::Saturday,
            chrono::Weekday::Sun => Self::Sunday,
        }
    }
}

/// `[start, end)` in UTC. Start inclusive, end exclusive, end > start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            bail!("window end must be after start ({start} >= {end})");
        }
        Ok(Self { start, end })
    }

    /// The local day containing `at`, as `[startOfDay, startOfNextDay)`.
    pub fn day_of(at: DateTime<Utc>, tz: Tz) -> Self {
        let local_date = at.with_timezone(&tz).date_naive();
        Self::days_from(local_date, 1, tz)
    }

    /// `days` local days starting at the local midnight of `date`.
    pub fn days_from(date: NaiveDate, days: u32, tz: Tz) -> Self {
        let start = local_midnight(date, tz);
        let end_date = date + Duration::days(days.max(1) as i64);
        let end = local_midnight(end_date, tz);
        Self { start, end }
    }

    /// Default pinned-events window: `[now, now + days)`.
    pub fn from_now(now: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: now,
            end: now + Duration::days(days),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }

    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days().max(1)
    }

    /// Split into contiguous half-open chunks of at most `chunk_days` days.
    /// The chunks exactly cover `[start, end)`.
    pub fn chunks(&self, chunk_days: i64) -> Vec<Window> {
        let chunk_days = chunk_days.max(1);
        let mut out = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let next = (cursor + Duration::days(chunk_days)).min(self.end);
            out.push(Window {
                start: cursor,
                end: next,
            });
            cursor = next;
        }
        out
    }
}

/// Resolve a local midnight to UTC. Around DST transitions chrono can report
/// the local timestamp as ambiguous or skipped; take the earliest valid
/// instant so windows stay contiguous.
fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        chrono::LocalResult::None => {
            // Skipped by a DST jump; roll forward an hour.
            let later = naive + Duration::hours(1);
            tz.from_local_datetime(&later)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
        }
    }
}

/// The local weekday of an instant in `tz`.
pub fn local_day_of_week(at: DateTime<Utc>, tz: Tz) -> DayOfWeek {
    DayOfWeek::from_weekday(at.with_timezone(&tz).weekday())
}
