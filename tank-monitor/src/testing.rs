//! In-memory fakes for the storage, mail and telemetry seams.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use tank_client::db::CooldownMarker;
use tank_client::domain::{parse_capacity_liters, ReadingPoint, TerminalInfo, ThresholdConfig};
use time::OffsetDateTime;

use crate::notify::{MailError, Mailer};
use crate::store::{ConfigStore, HistoryStore, ThresholdStore};
use crate::telemetry::{RawReading, TelemetryClient, TelemetryError};

#[derive(Default)]
struct MemoryState {
    configs: HashMap<String, ThresholdConfig>,
    readings: HashMap<String, Vec<ReadingPoint>>,
    capacities: HashMap<String, f64>,
    writes: usize,
    history_queries: usize,
    unavailable: bool,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

fn marker_mut(cfg: &mut ThresholdConfig, marker: CooldownMarker) -> &mut Option<OffsetDateTime> {
    match marker {
        CooldownMarker::Min => &mut cfg.last_min_alarm_sent_at,
        CooldownMarker::Max => &mut cfg.last_max_alarm_sent_at,
    }
}

impl MemoryStore {
    pub fn put_config(&self, cfg: ThresholdConfig) {
        let mut state = self.state.lock().unwrap();
        state.configs.insert(cfg.terminal_id.clone(), cfg);
    }

    pub fn update_config(&self, terminal_id: &str, f: impl FnOnce(&mut ThresholdConfig)) {
        let mut state = self.state.lock().unwrap();
        if let Some(cfg) = state.configs.get_mut(terminal_id) {
            f(cfg);
        }
    }

    pub fn config(&self, terminal_id: &str) -> Option<ThresholdConfig> {
        self.state.lock().unwrap().configs.get(terminal_id).cloned()
    }

    pub fn push_reading(&self, terminal_id: &str, ts: OffsetDateTime, value: f64) {
        let mut state = self.state.lock().unwrap();
        state
            .readings
            .entry(terminal_id.to_string())
            .or_default()
            .push(ReadingPoint { ts, value });
    }

    pub fn set_capacity(&self, terminal_id: &str, liters: f64) {
        self.state
            .lock()
            .unwrap()
            .capacities
            .insert(terminal_id.to_string(), liters);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    /// Number of cooldown mutations applied so far.
    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    pub fn history_queries(&self) -> usize {
        self.state.lock().unwrap().history_queries
    }

    fn check(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            bail!("store unavailable");
        }
        Ok(state)
    }
}

#[async_trait::async_trait]
impl ThresholdStore for MemoryStore {
    async fn threshold_config(&self, terminal_id: &str) -> Result<Option<ThresholdConfig>> {
        Ok(self.check()?.configs.get(terminal_id).cloned())
    }

    async fn claim_cooldown(
        &self,
        terminal_id: &str,
        marker: CooldownMarker,
        now: OffsetDateTime,
        cutoff: OffsetDateTime,
    ) -> Result<bool> {
        let mut state = self.check()?;
        let Some(cfg) = state.configs.get_mut(terminal_id) else {
            return Ok(false);
        };
        let slot = marker_mut(cfg, marker);
        if slot.map_or(true, |at| at <= cutoff) {
            *slot = Some(now);
            state.writes += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn release_cooldown(
        &self,
        terminal_id: &str,
        marker: CooldownMarker,
        claimed_at: OffsetDateTime,
        previous: Option<OffsetDateTime>,
    ) -> Result<()> {
        let mut state = self.check()?;
        if let Some(cfg) = state.configs.get_mut(terminal_id) {
            let slot = marker_mut(cfg, marker);
            if *slot == Some(claimed_at) {
                *slot = previous;
                state.writes += 1;
            }
        }
        Ok(())
    }

    async fn clear_cooldowns(&self, terminal_id: &str, clear_min: bool, clear_max: bool) -> Result<()> {
        let mut state = self.check()?;
        if let Some(cfg) = state.configs.get_mut(terminal_id) {
            if clear_min {
                cfg.last_min_alarm_sent_at = None;
            }
            if clear_max {
                cfg.last_max_alarm_sent_at = None;
            }
            state.writes += 1;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl HistoryStore for MemoryStore {
    async fn readings_in_range(
        &self,
        terminal_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<ReadingPoint>> {
        let mut state = self.check()?;
        state.history_queries += 1;
        let mut points: Vec<ReadingPoint> = state
            .readings
            .get(terminal_id)
            .map(|v| v.iter().copied().filter(|p| p.ts >= start && p.ts < end).collect())
            .unwrap_or_default();
        points.sort_by_key(|p| p.ts);
        Ok(points)
    }

    async fn capacity_liters(&self, terminal_id: &str) -> Result<Option<f64>> {
        Ok(self.check()?.capacities.get(terminal_id).copied())
    }

    async fn known_terminals(&self, since: OffsetDateTime) -> Result<Vec<String>> {
        let state = self.check()?;
        let mut ids: BTreeSet<String> = state.configs.keys().cloned().collect();
        for (id, points) in &state.readings {
            if points.iter().any(|p| p.ts >= since) {
                ids.insert(id.clone());
            }
        }
        Ok(ids.into_iter().collect())
    }
}

#[async_trait::async_trait]
impl ConfigStore for MemoryStore {
    async fn upsert_thresholds(
        &self,
        terminal_id: &str,
        min_level: Option<f64>,
        max_level: Option<f64>,
        alarm_email: Option<&str>,
    ) -> Result<ThresholdConfig> {
        let mut state = self.check()?;
        let cfg = state
            .configs
            .entry(terminal_id.to_string())
            .or_insert_with(|| ThresholdConfig {
                terminal_id: terminal_id.to_string(),
                ..Default::default()
            });
        cfg.min_level = min_level;
        cfg.max_level = max_level;
        cfg.alarm_email = alarm_email.map(str::to_string);
        Ok(cfg.clone())
    }

    async fn upsert_capacity(&self, terminal_id: &str, tank_capacity: Option<&str>) -> Result<TerminalInfo> {
        let mut state = self.check()?;
        match tank_capacity.and_then(parse_capacity_liters) {
            Some(liters) => state.capacities.insert(terminal_id.to_string(), liters),
            None => state.capacities.remove(terminal_id),
        };
        Ok(TerminalInfo {
            terminal_id: terminal_id.to_string(),
            serial: None,
            tank_capacity: tank_capacity.map(str::to_string),
            updated_at: OffsetDateTime::now_utc(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Clone, Default)]
pub struct FakeMailer {
    sent: Arc<Mutex<Vec<SentMail>>>,
    failures_left: Arc<Mutex<usize>>,
}

impl FakeMailer {
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_next(&self, n: usize) {
        *self.failures_left.lock().unwrap() = n;
    }
}

#[async_trait::async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<(), MailError> {
        {
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(MailError::DeliveryFailed("smtp 451 try again later".into()));
            }
        }
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

type Scripted = Result<RawReading, TelemetryError>;

#[derive(Clone, Default)]
pub struct FakeTelemetry {
    responses: Arc<Mutex<HashMap<String, VecDeque<Scripted>>>>,
    calls: Arc<Mutex<usize>>,
}

fn clone_scripted(r: &Scripted) -> Scripted {
    match r {
        Ok(raw) => Ok(raw.clone()),
        Err(TelemetryError::DeviceUnreachable(m)) => Err(TelemetryError::DeviceUnreachable(m.clone())),
        Err(TelemetryError::DeviceOffline(m)) => Err(TelemetryError::DeviceOffline(m.clone())),
        Err(TelemetryError::InvalidResponse(m)) => Err(TelemetryError::InvalidResponse(m.clone())),
    }
}

impl FakeTelemetry {
    /// Queue a response; the last queued response repeats once the queue drains.
    pub fn respond(&self, terminal_id: &str, response: Scripted) {
        self.responses
            .lock()
            .unwrap()
            .entry(terminal_id.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl TelemetryClient for FakeTelemetry {
    async fn fetch_reading(&self, terminal_id: &str, _variable_name: &str) -> Result<RawReading, TelemetryError> {
        *self.calls.lock().unwrap() += 1;
        let mut responses = self.responses.lock().unwrap();
        let Some(queue) = responses.get_mut(terminal_id) else {
            return Err(TelemetryError::DeviceUnreachable(format!("{terminal_id}: no script")));
        };
        if queue.len() > 1 {
            if let Some(r) = queue.pop_front() {
                return r;
            }
        }
        match queue.front() {
            Some(r) => clone_scripted(r),
            None => Err(TelemetryError::DeviceUnreachable(format!("{terminal_id}: no script"))),
        }
    }
}
