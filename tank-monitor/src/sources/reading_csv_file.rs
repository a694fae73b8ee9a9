use std::{fs::File, path::PathBuf};

use csv::StringRecord;
use tank_client::domain::Reading;

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};
use crate::telemetry::xml::{parse_level, parse_timestamp};

/// CSV backfill source for historical tank readings.
///
/// Expected header columns (by name):
/// - ts (RFC3339 or `YYYY-MM-DD HH:MM:SS`, UTC)
/// - terminal_id
/// - value (decimal point or comma)
/// - serial (optional)
///
/// Unparseable `ts`/`value` cells become `None`; validation downstream drops
/// those rows. Rows without a terminal are skipped and counted.
pub struct ReadingCsvFileSource {
    path: PathBuf,
}

impl ReadingCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn parse_optional_string(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn record_to_reading(record: &StringRecord, headers: &StringRecord) -> Result<Reading, PipelineError> {
    let get = |name: &str| -> Result<&str, PipelineError> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .and_then(|idx| record.get(idx))
            .ok_or_else(|| PipelineError::Source(format!("missing column '{name}' in CSV record")))
    };

    let terminal_id = parse_optional_string(get("terminal_id")?)
        .ok_or_else(|| PipelineError::Source("empty terminal_id in CSV record".to_string()))?;

    Ok(Reading {
        terminal_id,
        value: parse_level(get("value")?),
        ts: parse_timestamp(get("ts")?),
        serial: get("serial").ok().and_then(parse_optional_string),
    })
}

#[async_trait::async_trait]
impl Source<Reading> for ReadingCsvFileSource {
    async fn stream(&self) -> EnvelopeStream<Reading> {
        // Blocking CSV reader inside a single task; backfills are one-off jobs.
        let path = self.path.clone();
        let s = async_stream::try_stream! {
            let file = File::open(&path)
                .map_err(|e| PipelineError::Source(format!("failed to open CSV file: {e}")))?;
            let mut rdr = csv::Reader::from_reader(file);
            let headers = rdr
                .headers()
                .map_err(|e| PipelineError::Source(format!("failed to read CSV headers: {e}")))?
                .clone();

            for result in rdr.records() {
                let record = result.map_err(|e| PipelineError::Source(format!(
                    "failed to read CSV record: {e}"
                )))?;

                // A bad row is skipped; the rest of the file still imports.
                let reading = match record_to_reading(&record, &headers) {
                    Ok(r) => r,
                    Err(e) => {
                        metrics::counter!("reading_csv_parse_errors_total").increment(1);
                        tracing::warn!(error = %e, line = ?record.position().map(|p| p.line()), "skipping CSV row");
                        continue;
                    }
                };

                yield Envelope::now(reading);
            }
        };

        Box::pin(s)
    }
}
