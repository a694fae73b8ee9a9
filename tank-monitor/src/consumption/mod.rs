//! Gas consumption estimates from irregular tank level samples.
//!
//! A day's consumption is the sum of every downward step between consecutive
//! samples of that UTC day. Upward steps (refills, sensor noise) add nothing,
//! so a refill in the middle of a day neither cancels the consumption before
//! it nor drives the figure negative.

mod cache;
mod service;

use serde::{Serialize, Serializer};
use tank_client::domain::ReadingPoint;
use time::{macros::format_description, Date, Duration, OffsetDateTime, UtcOffset};

pub use cache::ReportCache;
pub use service::{ConsumptionService, ConsumptionSettings};

pub const DEFAULT_MIN_READINGS_PER_DAY: usize = 3;
pub const DEFAULT_WINDOW_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct DailyBucket {
    pub day: Date,
    pub percent_drop: f64,
    pub sample_count: usize,
}

/// Reduce readings to one bucket per UTC day, ascending by day.
///
/// Input is sorted by timestamp first; non-finite values are skipped.
pub fn daily_series(points: &[ReadingPoint]) -> Vec<DailyBucket> {
    let mut sorted: Vec<ReadingPoint> = points.iter().copied().filter(|p| p.value.is_finite()).collect();
    sorted.sort_by_key(|p| p.ts);

    let mut buckets: Vec<DailyBucket> = Vec::new();
    let mut prev: Option<f64> = None;

    for point in sorted {
        let day = point.ts.to_offset(UtcOffset::UTC).date();
        match buckets.last_mut() {
            Some(bucket) if bucket.day == day => {
                if let Some(p) = prev {
                    if point.value < p {
                        bucket.percent_drop += p - point.value;
                    }
                }
                bucket.sample_count += 1;
            }
            _ => buckets.push(DailyBucket {
                day,
                percent_drop: 0.0,
                sample_count: 1,
            }),
        }
        prev = Some(point.value);
    }

    buckets
}

/// The report window: full UTC days strictly before `today`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReportWindow {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
    pub yesterday: Date,
}

impl ReportWindow {
    pub fn ending_before(today: Date, days: u32) -> Self {
        let days = days.max(1);
        let start_day = today - Duration::days(i64::from(days));
        Self {
            start: start_day.midnight().assume_utc(),
            end: today.midnight().assume_utc(),
            yesterday: today - Duration::days(1),
        }
    }

    pub fn for_instant(now: OffsetDateTime, days: u32) -> Self {
        Self::ending_before(now.to_offset(UtcOffset::UTC).date(), days)
    }

    pub fn contains(&self, ts: OffsetDateTime) -> bool {
        ts >= self.start && ts < self.end
    }
}

fn serialize_date<S: Serializer>(day: &Date, serializer: S) -> Result<S::Ok, S::Error> {
    let formatted = day
        .format(format_description!("[year]-[month]-[day]"))
        .map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&formatted)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyFigure {
    #[serde(serialize_with = "serialize_date")]
    pub day: Date,
    pub percent: f64,
    pub liters: Option<f64>,
    pub sample_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyFigures {
    /// Days in the window with at least one sample.
    pub days_with_data: usize,
    /// Days with enough samples to enter the average.
    pub included_days: usize,
    pub min_readings_per_day: usize,
    pub avg_percent_per_day: f64,
    pub avg_liters_per_day: Option<f64>,
    pub total_percent: f64,
    pub total_liters: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumptionReport {
    pub terminal_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub window_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub window_end: OffsetDateTime,
    pub capacity_liters: Option<f64>,
    pub daily: Option<DailyFigure>,
    pub monthly: MonthlyFigures,
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn liters(capacity: Option<f64>, percent: f64) -> Option<f64> {
    capacity.map(|c| round2(c * percent / 100.0))
}

/// Build the consumption report for one terminal.
///
/// The average only uses days with `min_readings_per_day` samples or more;
/// the total uses every day in the window. With no qualifying day the
/// average is 0.
pub fn build_report(
    terminal_id: &str,
    window: &ReportWindow,
    points: &[ReadingPoint],
    capacity_liters: Option<f64>,
    min_readings_per_day: usize,
) -> ConsumptionReport {
    let in_window: Vec<ReadingPoint> = points.iter().copied().filter(|p| window.contains(p.ts)).collect();
    let series = daily_series(&in_window);

    let daily = series
        .iter()
        .find(|b| b.day == window.yesterday)
        .map(|b| DailyFigure {
            day: b.day,
            percent: round2(b.percent_drop),
            liters: liters(capacity_liters, b.percent_drop),
            sample_count: b.sample_count,
        });

    let included: Vec<&DailyBucket> = series
        .iter()
        .filter(|b| b.sample_count >= min_readings_per_day)
        .collect();
    let avg = if included.is_empty() {
        0.0
    } else {
        included.iter().map(|b| b.percent_drop).sum::<f64>() / included.len() as f64
    };
    let total: f64 = series.iter().map(|b| b.percent_drop).sum();

    ConsumptionReport {
        terminal_id: terminal_id.to_string(),
        window_start: window.start,
        window_end: window.end,
        capacity_liters,
        daily,
        monthly: MonthlyFigures {
            days_with_data: series.len(),
            included_days: included.len(),
            min_readings_per_day,
            avg_percent_per_day: round2(avg),
            avg_liters_per_day: liters(capacity_liters, avg),
            total_percent: round2(total),
            total_liters: liters(capacity_liters, total),
        },
    }
}
