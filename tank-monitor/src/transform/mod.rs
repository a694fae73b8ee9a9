use std::sync::Arc;

use crate::alarms::AlarmService;
use crate::pipeline::{Envelope, PipelineError, Transform};
use tank_client::domain::Reading;
use time::macros::datetime;

/// Pure validation of a polled `Reading`.
///
/// Rules:
/// - value must be present and finite (out-of-range percentages are kept).
/// - ts must be present and within a broad sanity window [2000-01-01, 2100-01-01).
pub fn validate_reading(env: Envelope<Reading>) -> Result<Envelope<Reading>, PipelineError> {
    let r = &env.payload;

    if !r.value.is_some_and(f64::is_finite) {
        return Err(PipelineError::Transform(format!("{}: missing level value", r.terminal_id)));
    }

    let Some(ts) = r.ts else {
        return Err(PipelineError::Transform(format!("{}: missing or unparseable timestamp", r.terminal_id)));
    };

    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    if ts < min_ts || ts >= max_ts {
        return Err(PipelineError::Transform(format!("{}: timestamp out of allowed range", r.terminal_id)));
    }

    Ok(env)
}

#[derive(Clone, Default)]
pub struct ReadingValidation;

#[async_trait::async_trait]
impl Transform<Reading, Reading> for ReadingValidation {
    fn name(&self) -> &'static str {
        "reading_validation"
    }

    async fn apply(&self, input: Envelope<Reading>) -> Result<Envelope<Reading>, PipelineError> {
        match validate_reading(input) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("validation_reading_rejected_total").increment(1);
                Err(e)
            }
        }
    }
}

/// Runs alarm evaluation on each reading and passes it on unchanged.
///
/// Evaluation failures are logged; the reading is still persisted.
pub struct AlarmEvaluation {
    alarms: Arc<AlarmService>,
}

impl AlarmEvaluation {
    pub fn new(alarms: Arc<AlarmService>) -> Self {
        Self { alarms }
    }
}

#[async_trait::async_trait]
impl Transform<Reading, Reading> for AlarmEvaluation {
    fn name(&self) -> &'static str {
        "alarm_evaluation"
    }

    async fn apply(&self, input: Envelope<Reading>) -> Result<Envelope<Reading>, PipelineError> {
        match self.alarms.evaluate_and_maybe_alarm(&input.payload).await {
            Ok(fired) if !fired.is_empty() => {
                tracing::info!(terminal_id = %input.payload.terminal_id, alarms = fired.len(), "alarms fired");
            }
            Ok(_) => {}
            Err(e) => {
                metrics::counter!("alarm_evaluation_errors_total").increment(1);
                tracing::warn!(error = %e, terminal_id = %input.payload.terminal_id, "alarm evaluation failed");
            }
        }
        Ok(input)
    }
}
