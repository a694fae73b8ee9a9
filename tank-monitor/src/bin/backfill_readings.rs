use anyhow::{bail, Result};
use sqlx::postgres::PgPoolOptions;
use std::{env, sync::Arc, time::Duration};
use tank_client::domain::Reading;
use tank_monitor::{
    config::AppConfig,
    observability,
    pipeline::Pipeline,
    sinks::ReadingSink,
    sources::ReadingCsvFileSource,
    transform,
};

/// Import historical readings. Alarms are not evaluated for backfilled data.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: backfill_readings <csv_file_path>");
    }
    let file_path = &args[1];

    // TANK_MONITOR_CONFIG may point to a backfill-specific file with a larger batch size.
    let cfg = AppConfig::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;

    let sink = ReadingSink::new(
        pool,
        cfg.sink.batch_size,
        cfg.sink.max_retries,
        Duration::from_millis(cfg.sink.retry_backoff_ms),
        Duration::from_millis(cfg.sink.flush_interval_ms),
    );

    let source = ReadingCsvFileSource::new(file_path);

    let pipeline: Pipeline<_, Reading, _> = Pipeline {
        name: "reading_backfill",
        source,
        transforms: vec![Arc::new(transform::ReadingValidation)],
        sink,
    };

    pipeline.run().await?;

    Ok(())
}
