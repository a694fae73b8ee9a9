use std::{collections::BTreeMap, time::Duration};

use futures::StreamExt;
use sqlx::{postgres::PgPool, Postgres, QueryBuilder};
use tank_client::db;
use tank_client::domain::{Reading, StoredReading};

use crate::pipeline::{Envelope, PipelineError, Sink};

/// Batched writer for `tank_readings`.
///
/// A batch is flushed when it reaches `batch_size` or when no reading arrived
/// for `flush_interval`, whichever comes first.
pub struct ReadingSink {
    pool: PgPool,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
    flush_interval: Duration,
}

impl ReadingSink {
    pub fn new(
        pool: PgPool,
        batch_size: usize,
        max_retries: u32,
        retry_backoff: Duration,
        flush_interval: Duration,
    ) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
            max_retries,
            retry_backoff,
            flush_interval,
        }
    }

    async fn flush_batch(&self, batch: &[Envelope<StoredReading>]) -> Result<(), PipelineError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut attempt: u32 = 0;
        loop {
            let res = self.insert_batch(batch).await;
            match res {
                Ok(inserted) => {
                    metrics::counter!("readings_persisted_total").increment(inserted);
                    let duplicates = batch.len() as u64 - inserted.min(batch.len() as u64);
                    if duplicates > 0 {
                        metrics::counter!("readings_duplicate_total").increment(duplicates);
                    }

                    // Approximate poll-to-disk latency from the oldest reading in the batch.
                    if let Some(min_received) = batch.iter().map(|e| e.received_at).min() {
                        if let Ok(dur) = std::time::SystemTime::now().duration_since(min_received) {
                            metrics::histogram!("ingest_end_to_end_latency_seconds").record(dur.as_secs_f64());
                        }
                    }

                    self.record_serials(batch).await;
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        "reading sink flush failed, retrying with backoff"
                    );
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "reading sink flush failed, giving up");
                    metrics::counter!("reading_sink_errors_total").increment(1);
                    return Err(PipelineError::Sink(e.to_string()));
                }
            }
        }
    }

    /// Returns the number of rows actually written; samples already stored are skipped.
    async fn insert_batch(&self, batch: &[Envelope<StoredReading>]) -> Result<u64, sqlx::Error> {
        let mut builder =
            QueryBuilder::<Postgres>::new("INSERT INTO tank_readings (ts, terminal_id, value, serial) ");

        builder.push_values(batch, |mut b, env| {
            let r = &env.payload;
            b.push_bind(r.ts)
                .push_bind(&r.terminal_id)
                .push_bind(r.value)
                .push_bind(&r.serial);
        });
        builder.push(" ON CONFLICT (terminal_id, ts) DO NOTHING");

        builder
            .build()
            .execute(&self.pool)
            .await
            .map(|done| done.rows_affected())
    }

    /// Keep `terminals.serial` current; a failure here never fails the batch.
    async fn record_serials(&self, batch: &[Envelope<StoredReading>]) {
        let latest: BTreeMap<&str, &str> = batch
            .iter()
            .filter_map(|e| Some((e.payload.terminal_id.as_str(), e.payload.serial.as_deref()?)))
            .collect();

        for (terminal_id, serial) in latest {
            if let Err(e) = db::terminals::upsert_serial(&self.pool, terminal_id, serial).await {
                tracing::warn!(error = %e, terminal_id, "failed to record terminal serial");
            }
        }
    }
}

#[async_trait::async_trait]
impl Sink<Reading> for ReadingSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<Reading>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut buffer: Vec<Envelope<StoredReading>> = Vec::with_capacity(self.batch_size);

        loop {
            let item = match tokio::time::timeout(self.flush_interval, input.next()).await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(_idle) => {
                    self.flush_batch(&buffer).await?;
                    buffer.clear();
                    continue;
                }
            };

            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::warn!(error = %e, "reading dropped before persistence");
                    continue;
                }
            };

            let Some(stored) = env.payload.to_stored() else {
                metrics::counter!("readings_unusable_total").increment(1);
                continue;
            };
            buffer.push(Envelope {
                payload: stored,
                received_at: env.received_at,
            });

            if buffer.len() >= self.batch_size {
                self.flush_batch(&buffer).await?;
                buffer.clear();
            }
        }

        if !buffer.is_empty() {
            self.flush_batch(&buffer).await?;
        }

        Ok(())
    }
}
