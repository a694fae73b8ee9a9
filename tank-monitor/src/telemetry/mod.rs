//! Access to the third-party telemetry service that reports tank levels.

pub mod soap;
pub mod xml;

use time::OffsetDateTime;

pub use soap::SoapTelemetryClient;

/// What the telemetry service answered for one terminal variable.
///
/// `value` and `timestamp` are `None` when the service omitted them or they
/// could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub value: Option<f64>,
    pub timestamp: Option<OffsetDateTime>,
    pub serial: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("device unreachable: {0}")]
    DeviceUnreachable(String),
    #[error("device offline: {0}")]
    DeviceOffline(String),
    #[error("invalid telemetry response: {0}")]
    InvalidResponse(String),
}

impl TelemetryError {
    /// Stable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DeviceUnreachable(_) => "unreachable",
            Self::DeviceOffline(_) => "offline",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

#[async_trait::async_trait]
pub trait TelemetryClient: Send + Sync {
    async fn fetch_reading(
        &self,
        terminal_id: &str,
        variable_name: &str,
    ) -> Result<RawReading, TelemetryError>;
}
