//! Storage seams used by the alarm evaluator and the consumption service.

use std::collections::BTreeSet;

use anyhow::Result;
use sqlx::PgPool;
use tank_client::db::{self, CooldownMarker};
use tank_client::domain::{ReadingPoint, TerminalInfo, ThresholdConfig};
use time::OffsetDateTime;

#[async_trait::async_trait]
pub trait ThresholdStore: Send + Sync {
    async fn threshold_config(&self, terminal_id: &str) -> Result<Option<ThresholdConfig>>;

    /// Compare-and-set the marker to `now` if it is unset or `<= cutoff`.
    async fn claim_cooldown(
        &self,
        terminal_id: &str,
        marker: CooldownMarker,
        now: OffsetDateTime,
        cutoff: OffsetDateTime,
    ) -> Result<bool>;

    /// Restore `previous` if the marker still holds `claimed_at`.
    async fn release_cooldown(
        &self,
        terminal_id: &str,
        marker: CooldownMarker,
        claimed_at: OffsetDateTime,
        previous: Option<OffsetDateTime>,
    ) -> Result<()>;

    async fn clear_cooldowns(&self, terminal_id: &str, clear_min: bool, clear_max: bool) -> Result<()>;
}

#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Readings in `[start, end)`, ascending by timestamp.
    async fn readings_in_range(
        &self,
        terminal_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<ReadingPoint>>;

    async fn capacity_liters(&self, terminal_id: &str) -> Result<Option<f64>>;

    /// Terminals with a threshold configuration or any reading since `since`.
    async fn known_terminals(&self, since: OffsetDateTime) -> Result<Vec<String>>;
}

/// Operator-editable terminal settings behind the HTTP API.
#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
    /// Replace thresholds and recipients; cooldown markers are left untouched.
    async fn upsert_thresholds(
        &self,
        terminal_id: &str,
        min_level: Option<f64>,
        max_level: Option<f64>,
        alarm_email: Option<&str>,
    ) -> Result<ThresholdConfig>;

    async fn upsert_capacity(&self, terminal_id: &str, tank_capacity: Option<&str>) -> Result<TerminalInfo>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ThresholdStore for PgStore {
    async fn threshold_config(&self, terminal_id: &str) -> Result<Option<ThresholdConfig>> {
        db::thresholds::threshold_config(&self.pool, terminal_id).await
    }

    async fn claim_cooldown(
        &self,
        terminal_id: &str,
        marker: CooldownMarker,
        now: OffsetDateTime,
        cutoff: OffsetDateTime,
    ) -> Result<bool> {
        db::thresholds::claim_cooldown_marker(&self.pool, terminal_id, marker, now, cutoff).await
    }

    async fn release_cooldown(
        &self,
        terminal_id: &str,
        marker: CooldownMarker,
        claimed_at: OffsetDateTime,
        previous: Option<OffsetDateTime>,
    ) -> Result<()> {
        db::thresholds::release_cooldown_marker(&self.pool, terminal_id, marker, claimed_at, previous).await?;
        Ok(())
    }

    async fn clear_cooldowns(&self, terminal_id: &str, clear_min: bool, clear_max: bool) -> Result<()> {
        db::thresholds::clear_cooldown_markers(&self.pool, terminal_id, clear_min, clear_max).await
    }
}

#[async_trait::async_trait]
impl HistoryStore for PgStore {
    async fn readings_in_range(
        &self,
        terminal_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<ReadingPoint>> {
        db::readings::readings_in_range(&self.pool, terminal_id, start, end).await
    }

    async fn capacity_liters(&self, terminal_id: &str) -> Result<Option<f64>> {
        let info = db::terminals::terminal_info(&self.pool, terminal_id).await?;
        Ok(info.and_then(|i| i.capacity_liters()))
    }

    async fn known_terminals(&self, since: OffsetDateTime) -> Result<Vec<String>> {
        let mut ids: BTreeSet<String> = db::thresholds::configured_terminals(&self.pool)
            .await?
            .into_iter()
            .collect();
        ids.extend(db::readings::terminals_with_readings_since(&self.pool, since).await?);
        Ok(ids.into_iter().collect())
    }
}

#[async_trait::async_trait]
impl ConfigStore for PgStore {
    async fn upsert_thresholds(
        &self,
        terminal_id: &str,
        min_level: Option<f64>,
        max_level: Option<f64>,
        alarm_email: Option<&str>,
    ) -> Result<ThresholdConfig> {
        db::thresholds::upsert_threshold_config(&self.pool, terminal_id, min_level, max_level, alarm_email).await
    }

    async fn upsert_capacity(&self, terminal_id: &str, tank_capacity: Option<&str>) -> Result<TerminalInfo> {
        db::terminals::upsert_capacity(&self.pool, terminal_id, tank_capacity).await
    }
}
