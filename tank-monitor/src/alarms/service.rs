use std::sync::Arc;

use anyhow::Result;
use tank_client::domain::Reading;
use time::{Duration, OffsetDateTime};

use super::{alarm_body, alarm_subject, evaluate, AlarmNotification, DueAlarm};
use crate::notify::{MailError, Mailer};
use crate::store::ThresholdStore;

/// Evaluates readings against stored thresholds and delivers alarm emails.
///
/// A due alarm first claims its cooldown marker with a compare-and-set, so two
/// concurrent evaluations of the same terminal cannot both send. If delivery
/// then fails the claim is released and the next reading retries.
pub struct AlarmService {
    store: Arc<dyn ThresholdStore>,
    mailer: Option<Arc<dyn Mailer>>,
    throttle: Duration,
}

impl AlarmService {
    pub fn new(store: Arc<dyn ThresholdStore>, mailer: Option<Arc<dyn Mailer>>, throttle: Duration) -> Self {
        Self {
            store,
            mailer,
            throttle,
        }
    }

    pub async fn evaluate_and_maybe_alarm(&self, reading: &Reading) -> Result<Vec<AlarmNotification>> {
        self.evaluate_at(reading, OffsetDateTime::now_utc()).await
    }

    pub async fn evaluate_at(&self, reading: &Reading, now: OffsetDateTime) -> Result<Vec<AlarmNotification>> {
        if reading.value.filter(|v| v.is_finite()).is_none() || reading.ts.is_none() {
            return Ok(Vec::new());
        }

        let Some(config) = self.store.threshold_config(&reading.terminal_id).await? else {
            return Ok(Vec::new());
        };

        let eval = evaluate(reading, &config, now, self.throttle);
        if eval.is_noop() {
            return Ok(Vec::new());
        }

        let recipients = config.recipients();
        let mut sent = Vec::with_capacity(eval.due.len());

        for due in &eval.due {
            if let Some(notification) = self.fire(reading, &recipients, eval.value, due, now).await? {
                sent.push(notification);
            }
        }

        if eval.clear_min || eval.clear_max {
            self.store
                .clear_cooldowns(&reading.terminal_id, eval.clear_min, eval.clear_max)
                .await?;
            tracing::debug!(
                terminal_id = %reading.terminal_id,
                clear_min = eval.clear_min,
                clear_max = eval.clear_max,
                "level back in safe band, cooldown cleared"
            );
        }

        Ok(sent)
    }

    async fn fire(
        &self,
        reading: &Reading,
        recipients: &[String],
        value: f64,
        due: &DueAlarm,
        now: OffsetDateTime,
    ) -> Result<Option<AlarmNotification>> {
        let terminal_id = reading.terminal_id.as_str();
        let marker = due.kind.marker();

        let claimed = self
            .store
            .claim_cooldown(terminal_id, marker, now, now - self.throttle)
            .await?;
        if !claimed {
            tracing::debug!(terminal_id, kind = due.kind.as_str(), "alarm already claimed, skipping");
            return Ok(None);
        }

        let subject = alarm_subject(terminal_id, due.kind, value, due.threshold);
        let body = alarm_body(
            terminal_id,
            due.kind,
            value,
            due.threshold,
            reading.ts.unwrap_or(now),
            now,
        );

        let delivery = match &self.mailer {
            Some(mailer) => mailer.send(recipients, &subject, &body).await,
            None => Err(MailError::TransportUnavailable),
        };

        match delivery {
            Ok(()) => {
                metrics::counter!("alarms_sent_total", "kind" => due.kind.as_str()).increment(1);
                tracing::info!(terminal_id, kind = due.kind.as_str(), value, threshold = due.threshold, "alarm sent");
                Ok(Some(AlarmNotification {
                    kind: due.kind,
                    terminal_id: terminal_id.to_string(),
                    value,
                    threshold: due.threshold,
                    sent_at: now,
                }))
            }
            Err(e) => {
                metrics::counter!("alarms_failed_total", "kind" => due.kind.as_str()).increment(1);
                tracing::warn!(error = %e, terminal_id, kind = due.kind.as_str(), "alarm not delivered");
                self.store
                    .release_cooldown(terminal_id, marker, now, due.previous_sent_at)
                    .await?;
                Ok(None)
            }
        }
    }
}
