use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Per-terminal alarm configuration together with the two cooldown markers.
///
/// The markers record when the last "below minimum" / "above maximum" email
/// was delivered. Only the alarm evaluator writes them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ThresholdConfig {
    pub terminal_id: String,
    pub min_level: Option<f64>,
    pub max_level: Option<f64>,
    pub alarm_email: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_min_alarm_sent_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_max_alarm_sent_at: Option<OffsetDateTime>,
}

impl ThresholdConfig {
    /// Alarm recipients; addresses may be separated by commas or semicolons.
    pub fn recipients(&self) -> Vec<String> {
        self.alarm_email
            .as_deref()
            .unwrap_or("")
            .split([',', ';'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn alarms_enabled(&self) -> bool {
        !self.recipients().is_empty()
    }
}
