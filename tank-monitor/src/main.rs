use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tank_client::domain::Reading;
use tank_monitor::{
    alarms::AlarmService,
    api::{self, AppState},
    config::AppConfig,
    consumption::{ConsumptionService, ConsumptionSettings},
    metrics_server,
    notify::{smtp::SmtpMailer, Mailer},
    observability,
    pipeline::Pipeline,
    sinks::ReadingSink,
    sources::TelemetryPollerSource,
    store::PgStore,
    telemetry::{soap::SoapTelemetryClient, TelemetryClient},
    transform,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr).await?;
    }

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;
    let store = Arc::new(PgStore::new(pool.clone()));

    // Alarms are still evaluated without a transport; delivery fails and is retried later.
    let mailer: Option<Arc<dyn Mailer>> = match &cfg.alarms.smtp {
        Some(smtp_cfg) => match SmtpMailer::new(smtp_cfg) {
            Ok(m) => Some(Arc::new(m)),
            Err(e) => {
                tracing::warn!(error = %e, "smtp transport could not be configured, alarms will not be delivered");
                None
            }
        },
        None => {
            tracing::warn!("no [alarms.smtp] section, alarms will not be delivered");
            None
        }
    };

    let alarms = Arc::new(AlarmService::new(store.clone(), mailer, cfg.alarms.throttle()));
    let consumption = Arc::new(ConsumptionService::new(
        store.clone(),
        ConsumptionSettings::from(&cfg.consumption),
    ));

    let telemetry: Arc<dyn TelemetryClient> = Arc::new(SoapTelemetryClient::new(&cfg.telemetry)?);
    let source = TelemetryPollerSource::new(
        telemetry,
        cfg.telemetry.terminals.clone(),
        cfg.telemetry.variable_name.clone(),
        cfg.telemetry.poll_interval(),
    );
    let sink = ReadingSink::new(
        pool,
        cfg.sink.batch_size,
        cfg.sink.max_retries,
        Duration::from_millis(cfg.sink.retry_backoff_ms),
        Duration::from_millis(cfg.sink.flush_interval_ms),
    );
    let ingest: Pipeline<_, Reading, _> = Pipeline {
        name: "telemetry_ingest",
        source,
        transforms: vec![
            Arc::new(transform::ReadingValidation),
            Arc::new(transform::AlarmEvaluation::new(alarms.clone())),
        ],
        sink,
    };

    let state = AppState {
        alarms,
        consumption,
        thresholds: store.clone(),
        settings: store,
    };

    let ingest_task = async { ingest.run().await.map_err(anyhow::Error::from) };
    tokio::select! {
        res = async { tokio::try_join!(ingest_task, api::serve(&cfg.http.bind_addr, state)) } => {
            res?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    Ok(())
}
