use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TerminalInfo {
    pub terminal_id: String,
    pub serial: Option<String>,
    /// Free-form capacity as typed by an operator, e.g. "1000 L" or "1750,5 litri".
    pub tank_capacity: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TerminalInfo {
    pub fn capacity_liters(&self) -> Option<f64> {
        self.tank_capacity.as_deref().and_then(parse_capacity_liters)
    }
}

/// Extract the first numeric token of a free-form capacity string.
///
/// A token is a run of digits with at most one decimal separator (`.` or `,`).
/// Anything else (no digits, zero, non-finite) means the capacity is unknown.
pub fn parse_capacity_liters(raw: &str) -> Option<f64> {
    let start = raw.find(|c: char| c.is_ascii_digit())?;
    let mut token = String::new();
    let mut seen_separator = false;

    for c in raw[start..].chars() {
        match c {
            '0'..='9' => token.push(c),
            '.' | ',' if !seen_separator => {
                seen_separator = true;
                token.push('.');
            }
            _ => break,
        }
    }

    // "1000." -> "1000"
    let token = token.trim_end_matches('.');
    let liters: f64 = token.parse().ok()?;
    (liters.is_finite() && liters > 0.0).then_some(liters)
}
