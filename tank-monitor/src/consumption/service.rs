use std::sync::Arc;

use anyhow::Result;
use futures::{StreamExt, TryStreamExt};
use time::{Duration, OffsetDateTime};

use super::{build_report, ConsumptionReport, ReportCache, ReportWindow};
use crate::config::ConsumptionConfig;
use crate::store::HistoryStore;

/// Terminals whose reports are computed concurrently in bulk requests.
const BULK_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct ConsumptionSettings {
    pub min_readings_per_day: usize,
    pub window_days: u32,
    pub known_terminal_days: u32,
    pub cache_ttl: std::time::Duration,
}

impl From<&ConsumptionConfig> for ConsumptionSettings {
    fn from(cfg: &ConsumptionConfig) -> Self {
        Self {
            min_readings_per_day: cfg.min_readings_per_day,
            window_days: cfg.window_days,
            known_terminal_days: cfg.known_terminal_days,
            cache_ttl: std::time::Duration::from_secs(cfg.cache_ttl_secs),
        }
    }
}

impl Default for ConsumptionSettings {
    fn default() -> Self {
        Self::from(&ConsumptionConfig::default())
    }
}

pub struct ConsumptionService {
    store: Arc<dyn HistoryStore>,
    settings: ConsumptionSettings,
    cache: ReportCache,
}

impl ConsumptionService {
    pub fn new(store: Arc<dyn HistoryStore>, settings: ConsumptionSettings) -> Self {
        let cache = ReportCache::new(settings.cache_ttl);
        Self { store, settings, cache }
    }

    pub async fn report(&self, terminal_id: &str) -> Result<ConsumptionReport> {
        self.report_at(terminal_id, OffsetDateTime::now_utc()).await
    }

    pub async fn report_all(&self) -> Result<Vec<ConsumptionReport>> {
        self.report_all_at(OffsetDateTime::now_utc()).await
    }

    pub async fn report_at(&self, terminal_id: &str, now: OffsetDateTime) -> Result<ConsumptionReport> {
        let window = ReportWindow::for_instant(now, self.settings.window_days);

        if let Some(report) = self.cache.get(terminal_id, window.start, window.end).await {
            metrics::counter!("consumption_cache_hits_total").increment(1);
            return Ok(report);
        }
        metrics::counter!("consumption_cache_misses_total").increment(1);

        let points = self
            .store
            .readings_in_range(terminal_id, window.start, window.end)
            .await?;
        let capacity = self.store.capacity_liters(terminal_id).await?;

        let report = build_report(
            terminal_id,
            &window,
            &points,
            capacity,
            self.settings.min_readings_per_day,
        );
        tracing::debug!(
            terminal_id,
            samples = points.len(),
            days = report.monthly.days_with_data,
            "consumption report computed"
        );

        self.cache.put(&report).await;
        Ok(report)
    }

    /// Reports for every terminal with configuration or a recent reading.
    pub async fn report_all_at(&self, now: OffsetDateTime) -> Result<Vec<ConsumptionReport>> {
        let since = now - Duration::days(i64::from(self.settings.known_terminal_days));
        let terminals = self.store.known_terminals(since).await?;

        futures::stream::iter(terminals)
            .map(|terminal_id| async move { self.report_at(&terminal_id, now).await })
            .buffered(BULK_CONCURRENCY)
            .try_collect()
            .await
    }

    /// Drop cached reports after data that feeds them changed.
    pub async fn invalidate(&self, terminal_id: &str) {
        self.cache.invalidate(terminal_id).await;
    }
}
