use std::collections::HashMap;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::ConsumptionReport;

type CacheKey = (String, OffsetDateTime, OffsetDateTime);

struct CacheEntry {
    report: ConsumptionReport,
    expires_at: Instant,
}

/// Short-lived report cache keyed by terminal and window bounds.
///
/// Purely a shortcut around the history query; a zero TTL disables it.
pub struct ReportCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl ReportCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub async fn get(
        &self,
        terminal_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Option<ConsumptionReport> {
        if !self.enabled() {
            return None;
        }
        let key = (terminal_id.to_string(), start, end);
        let entries = self.entries.read().await;
        let entry = entries.get(&key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.report.clone())
    }

    pub async fn put(&self, report: &ConsumptionReport) {
        if !self.enabled() {
            return;
        }
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            (report.terminal_id.clone(), report.window_start, report.window_end),
            CacheEntry {
                report: report.clone(),
                expires_at: now + self.ttl,
            },
        );
    }

    pub async fn invalidate(&self, terminal_id: &str) {
        let mut entries = self.entries.write().await;
        entries.retain(|(id, _, _), _| id != terminal_id);
    }
}
