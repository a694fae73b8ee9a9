use serde::Deserialize;
use std::{fs, time::Duration};

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub uri: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    pub endpoint: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub soap_action: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_variable_name")]
    pub variable_name: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub terminals: Vec<String>,
}

impl TelemetryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

/// One year.
pub const MAX_THROTTLE_MINUTES: i64 = 366 * 24 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct AlarmConfig {
    #[serde(default = "default_throttle_minutes")]
    pub throttle_minutes: u64,
    /// No SMTP section means alarms are evaluated but never delivered.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

impl AlarmConfig {
    /// Cooldown between repeated alarms, capped at [`MAX_THROTTLE_MINUTES`].
    pub fn throttle(&self) -> time::Duration {
        let minutes = i64::try_from(self.throttle_minutes).unwrap_or(MAX_THROTTLE_MINUTES);
        time::Duration::minutes(minutes.min(MAX_THROTTLE_MINUTES))
    }
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            throttle_minutes: default_throttle_minutes(),
            smtp: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumptionConfig {
    #[serde(default = "default_min_readings_per_day")]
    pub min_readings_per_day: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default = "default_known_terminal_days")]
    pub known_terminal_days: u32,
}

impl Default for ConsumptionConfig {
    fn default() -> Self {
        Self {
            min_readings_per_day: default_min_readings_per_day(),
            cache_ttl_secs: default_cache_ttl_secs(),
            window_days: default_window_days(),
            known_terminal_days: default_known_terminal_days(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub alarms: AlarmConfig,
    #[serde(default)]
    pub consumption: ConsumptionConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    pub http: HttpConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("TANK_MONITOR_CONFIG").unwrap_or_else(|_| "tank-monitor.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        Ok(cfg)
    }
}

fn default_namespace() -> String {
    "http://tempuri.org/".to_string()
}

fn default_variable_name() -> String {
    "LIVELLO".to_string()
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_poll_interval_secs() -> u64 {
    900
}

fn default_smtp_port() -> u16 {
    587
}

fn default_throttle_minutes() -> u64 {
    crate::alarms::DEFAULT_THROTTLE.whole_minutes() as u64
}

fn default_min_readings_per_day() -> usize {
    crate::consumption::DEFAULT_MIN_READINGS_PER_DAY
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_window_days() -> u32 {
    crate::consumption::DEFAULT_WINDOW_DAYS
}

fn default_known_terminal_days() -> u32 {
    60
}

fn default_batch_size() -> usize {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_flush_interval_ms() -> u64 {
    2_000
}
