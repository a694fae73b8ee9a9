use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A tank level sample as surfaced by the telemetry service.
///
/// Both `value` and `ts` may be missing: the upstream service can answer
/// without a usable level or with a timestamp we could not parse. Such a
/// reading is still passed around so callers can see the null, but it is never
/// persisted nor used for alarms or consumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub terminal_id: String,
    pub value: Option<f64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub ts: Option<OffsetDateTime>,
    #[serde(default)]
    pub serial: Option<String>,
}

impl Reading {
    /// Returns the persisted form when both value and timestamp are usable.
    ///
    /// Percentages outside 0..=100 are kept as-is.
    pub fn to_stored(&self) -> Option<StoredReading> {
        let value = self.value.filter(|v| v.is_finite())?;
        let ts = self.ts?;
        Some(StoredReading {
            ts,
            terminal_id: self.terminal_id.clone(),
            value,
            serial: self.serial.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StoredReading {
    pub ts: OffsetDateTime,
    pub terminal_id: String,
    pub value: f64,
    pub serial: Option<String>,
}

/// The (timestamp, value) pair the consumption estimator works on.
#[derive(Debug, Clone, Copy, PartialEq, sqlx::FromRow)]
pub struct ReadingPoint {
    pub ts: OffsetDateTime,
    pub value: f64,
}
