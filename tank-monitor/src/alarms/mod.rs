//! Threshold alarms with a per-condition cooldown.
//!
//! Each terminal has two independent, rate-limited alarms: "below minimum"
//! and "above maximum". A marker records the last delivered email for each;
//! a new email is due once the marker is unset or older than the throttle.
//! Returning to the safe band clears the markers so the next crossing alarms
//! straight away.

mod service;

use serde::Serialize;
use tank_client::db::CooldownMarker;
use tank_client::domain::{Reading, ThresholdConfig};
use time::{Duration, OffsetDateTime};

pub use service::AlarmService;

pub const DEFAULT_THROTTLE: Duration = Duration::minutes(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmKind {
    Min,
    Max,
}

impl AlarmKind {
    pub fn marker(self) -> CooldownMarker {
        match self {
            Self::Min => CooldownMarker::Min,
            Self::Max => CooldownMarker::Max,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// An alarm that should be sent for the evaluated reading.
#[derive(Debug, Clone, PartialEq)]
pub struct DueAlarm {
    pub kind: AlarmKind,
    pub threshold: f64,
    /// Marker value at evaluation time, restored if delivery fails.
    pub previous_sent_at: Option<OffsetDateTime>,
}

/// Outcome of evaluating one reading against one configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub value: f64,
    pub due: Vec<DueAlarm>,
    pub clear_min: bool,
    pub clear_max: bool,
}

impl Evaluation {
    pub fn is_noop(&self) -> bool {
        self.due.is_empty() && !self.clear_min && !self.clear_max
    }
}

/// A delivered alarm, as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmNotification {
    pub kind: AlarmKind,
    pub terminal_id: String,
    pub value: f64,
    pub threshold: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: OffsetDateTime,
}

fn cooldown_elapsed(last: Option<OffsetDateTime>, now: OffsetDateTime, throttle: Duration) -> bool {
    match last {
        None => true,
        Some(at) => now - at >= throttle,
    }
}

/// Decide which alarms are due and which markers to clear.
///
/// Readings without a finite value or a timestamp, and configurations without
/// a recipient, evaluate to a no-op. Inverted thresholds (`min > max`) are not
/// rejected: both checks run independently and the band never clears.
pub fn evaluate(
    reading: &Reading,
    config: &ThresholdConfig,
    now: OffsetDateTime,
    throttle: Duration,
) -> Evaluation {
    let Some(value) = reading.value.filter(|v| v.is_finite()) else {
        return Evaluation::default();
    };
    if reading.ts.is_none() || !config.alarms_enabled() {
        return Evaluation::default();
    }

    let mut eval = Evaluation {
        value,
        ..Default::default()
    };

    if let Some(min) = config.min_level {
        if value < min && cooldown_elapsed(config.last_min_alarm_sent_at, now, throttle) {
            eval.due.push(DueAlarm {
                kind: AlarmKind::Min,
                threshold: min,
                previous_sent_at: config.last_min_alarm_sent_at,
            });
        }
    }

    if let Some(max) = config.max_level {
        if value > max && cooldown_elapsed(config.last_max_alarm_sent_at, now, throttle) {
            eval.due.push(DueAlarm {
                kind: AlarmKind::Max,
                threshold: max,
                previous_sent_at: config.last_max_alarm_sent_at,
            });
        }
    }

    let (clear_min, clear_max) = match (config.min_level, config.max_level) {
        (Some(min), Some(max)) => {
            let in_band = value >= min && value <= max;
            (in_band, in_band)
        }
        (Some(min), None) => (value >= min, false),
        (None, Some(max)) => (false, value <= max),
        (None, None) => (false, false),
    };

    // Only touch markers that are actually set.
    eval.clear_min = clear_min && config.last_min_alarm_sent_at.is_some();
    eval.clear_max = clear_max && config.last_max_alarm_sent_at.is_some();

    eval
}

pub fn alarm_subject(terminal_id: &str, kind: AlarmKind, value: f64, threshold: f64) -> String {
    match kind {
        AlarmKind::Min => format!(
            "[Tank {terminal_id}] level {value:.1}% below minimum {threshold:.1}%"
        ),
        AlarmKind::Max => format!(
            "[Tank {terminal_id}] level {value:.1}% above maximum {threshold:.1}%"
        ),
    }
}

pub fn alarm_body(
    terminal_id: &str,
    kind: AlarmKind,
    value: f64,
    threshold: f64,
    reading_ts: OffsetDateTime,
    now: OffsetDateTime,
) -> String {
    let fmt = &time::format_description::well_known::Rfc3339;
    let reading_at = reading_ts.format(fmt).unwrap_or_else(|_| reading_ts.to_string());
    let sent_at = now.format(fmt).unwrap_or_else(|_| now.to_string());
    let condition = match kind {
        AlarmKind::Min => "below the configured minimum",
        AlarmKind::Max => "above the configured maximum",
    };

    format!(
        "Terminal: {terminal_id}\n\
         Level: {value:.2}%\n\
         Threshold: {threshold:.2}%\n\
         The tank level is {condition}.\n\
         Reading time: {reading_at}\n\
         Sent at: {sent_at}\n"
    )
}
