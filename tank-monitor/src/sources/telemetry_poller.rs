use std::{collections::HashMap, sync::Arc, time::Duration};

use tank_client::domain::Reading;
use tokio::time::MissedTickBehavior;

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};
use crate::telemetry::TelemetryClient;

/// Polls every configured terminal once per interval.
///
/// Terminals are fetched one after another so readings of one terminal are
/// emitted in order. A failed fetch is logged and retried on the next tick.
/// A device that has not reported since the previous tick answers with the
/// same sample again; only samples newer than the last one emitted for that
/// terminal are passed on.
pub struct TelemetryPollerSource {
    client: Arc<dyn TelemetryClient>,
    terminals: Vec<String>,
    variable_name: String,
    interval: Duration,
    max_ticks: Option<u64>,
}

impl TelemetryPollerSource {
    pub fn new(
        client: Arc<dyn TelemetryClient>,
        terminals: Vec<String>,
        variable_name: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            terminals,
            variable_name: variable_name.into(),
            interval,
            max_ticks: None,
        }
    }

    /// Stop after `ticks` polling rounds instead of running forever.
    pub fn with_max_ticks(mut self, ticks: u64) -> Self {
        self.max_ticks = Some(ticks);
        self
    }
}

#[async_trait::async_trait]
impl Source<Reading> for TelemetryPollerSource {
    async fn stream(&self) -> EnvelopeStream<Reading> {
        let client = self.client.clone();
        let terminals = self.terminals.clone();
        let variable_name = self.variable_name.clone();
        let period = self.interval;
        let max_ticks = self.max_ticks;

        let s = async_stream::stream! {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ticks: u64 = 0;
            let mut last_emitted: HashMap<String, time::OffsetDateTime> = HashMap::new();

            loop {
                if max_ticks.is_some_and(|max| ticks >= max) {
                    break;
                }
                ticker.tick().await;
                ticks += 1;

                for terminal_id in &terminals {
                    match client.fetch_reading(terminal_id, &variable_name).await {
                        Ok(raw) => {
                            metrics::counter!("telemetry_readings_polled_total").increment(1);
                            if let Some(ts) = raw.timestamp {
                                if last_emitted.get(terminal_id).is_some_and(|last| ts <= *last) {
                                    metrics::counter!("telemetry_readings_unchanged_total").increment(1);
                                    tracing::debug!(terminal_id = %terminal_id, "no new sample since last poll");
                                    continue;
                                }
                                last_emitted.insert(terminal_id.clone(), ts);
                            }
                            let reading = Reading {
                                terminal_id: terminal_id.clone(),
                                value: raw.value,
                                ts: raw.timestamp,
                                serial: raw.serial,
                            };
                            yield Ok::<_, PipelineError>(Envelope::now(reading));
                        }
                        Err(e) => {
                            metrics::counter!("telemetry_poll_failures_total", "kind" => e.kind()).increment(1);
                            tracing::warn!(error = %e, terminal_id = %terminal_id, "telemetry poll failed");
                        }
                    }
                }
            }
        };

        Box::pin(s)
    }
}
