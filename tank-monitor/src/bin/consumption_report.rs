use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::{env, sync::Arc};
use tank_monitor::{
    config::AppConfig,
    consumption::{ConsumptionService, ConsumptionSettings},
    observability,
    store::PgStore,
};

/// Print consumption reports as JSON: one terminal if given, all known terminals otherwise.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing_with("warn");

    let cfg = AppConfig::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;

    let settings = ConsumptionSettings {
        // One-shot process; nothing to reuse.
        cache_ttl: std::time::Duration::ZERO,
        ..ConsumptionSettings::from(&cfg.consumption)
    };
    let service = ConsumptionService::new(Arc::new(PgStore::new(pool)), settings);

    let json = match env::args().nth(1) {
        Some(terminal_id) => serde_json::to_string_pretty(&service.report(&terminal_id).await?)?,
        None => serde_json::to_string_pretty(&service.report_all().await?)?,
    };
    println!("{json}");

    Ok(())
}
