//! JSON API over consumption reports, alarm evaluation and terminal settings.

mod error;

pub use error::{ApiError, ApiResult};

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tank_client::domain::{Reading, TerminalInfo, ThresholdConfig};

use crate::alarms::{AlarmNotification, AlarmService};
use crate::consumption::{ConsumptionReport, ConsumptionService};
use crate::store::{ConfigStore, ThresholdStore};
use crate::telemetry::xml::{parse_level, parse_timestamp};

#[derive(Clone)]
pub struct AppState {
    pub alarms: Arc<AlarmService>,
    pub consumption: Arc<ConsumptionService>,
    pub thresholds: Arc<dyn ThresholdStore>,
    pub settings: Arc<dyn ConfigStore>,
}

#[derive(Debug, Serialize)]
pub struct ConsumptionRows {
    pub rows: Vec<ConsumptionReport>,
}

/// Reading as posted by clients: `value` and `ts` may be numbers, strings in
/// any format the telemetry service uses, or garbage. Unparseable fields
/// become `None` and the evaluation is a no-op.
#[derive(Debug, Deserialize)]
pub struct ReadingRequest {
    pub terminal_id: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub ts: Option<Value>,
    #[serde(default)]
    pub serial: Option<String>,
}

impl From<ReadingRequest> for Reading {
    fn from(req: ReadingRequest) -> Self {
        let value = match req.value {
            Some(Value::Number(n)) => n.as_f64().filter(|v| v.is_finite()),
            Some(Value::String(s)) => parse_level(&s),
            _ => None,
        };
        let ts = match req.ts {
            Some(Value::String(s)) => parse_timestamp(&s),
            _ => None,
        };
        Reading {
            terminal_id: req.terminal_id,
            value,
            ts,
            serial: req.serial,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ThresholdUpdate {
    #[serde(default)]
    pub min_level: Option<f64>,
    #[serde(default)]
    pub max_level: Option<f64>,
    #[serde(default)]
    pub alarm_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CapacityUpdate {
    #[serde(default)]
    pub tank_capacity: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/consumption", get(consumption_all))
        .route("/api/consumption/:terminal_id", get(consumption_one))
        .route("/api/alarms/evaluate", post(evaluate_reading))
        .route("/api/thresholds/:terminal_id", get(get_thresholds).put(put_thresholds))
        .route("/api/terminals/:terminal_id/capacity", put(put_capacity))
        .with_state(state)
}

/// Bind `bind_addr` and serve the API until the listener fails.
pub async fn serve(bind_addr: &str, state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .with_context(|| format!("invalid http bind address '{bind_addr}'"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind http listener on {addr}"))?;

    tracing::info!(%addr, "http api listening");
    axum::serve(listener, router(state).into_make_service())
        .await
        .context("http api server error")
}

async fn healthz() -> &'static str {
    "ok"
}

async fn consumption_all(State(state): State<AppState>) -> ApiResult<Json<ConsumptionRows>> {
    let rows = state.consumption.report_all().await?;
    Ok(Json(ConsumptionRows { rows }))
}

async fn consumption_one(
    State(state): State<AppState>,
    Path(terminal_id): Path<String>,
) -> ApiResult<Json<ConsumptionReport>> {
    Ok(Json(state.consumption.report(&terminal_id).await?))
}

async fn evaluate_reading(
    State(state): State<AppState>,
    Json(request): Json<ReadingRequest>,
) -> ApiResult<Json<Vec<AlarmNotification>>> {
    if request.terminal_id.trim().is_empty() {
        return Err(ApiError::BadRequest("terminal_id must not be empty".into()));
    }
    let reading = Reading::from(request);
    Ok(Json(state.alarms.evaluate_and_maybe_alarm(&reading).await?))
}

async fn get_thresholds(
    State(state): State<AppState>,
    Path(terminal_id): Path<String>,
) -> ApiResult<Json<ThresholdConfig>> {
    state
        .thresholds
        .threshold_config(&terminal_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("terminal {terminal_id}")))
}

async fn put_thresholds(
    State(state): State<AppState>,
    Path(terminal_id): Path<String>,
    Json(update): Json<ThresholdUpdate>,
) -> ApiResult<Json<ThresholdConfig>> {
    for (field, level) in [("min_level", update.min_level), ("max_level", update.max_level)] {
        if level.is_some_and(|v| !v.is_finite()) {
            return Err(ApiError::BadRequest(format!("{field} must be a finite number")));
        }
    }

    let alarm_email = update.alarm_email.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let cfg = state
        .settings
        .upsert_thresholds(&terminal_id, update.min_level, update.max_level, alarm_email)
        .await?;

    tracing::info!(
        terminal_id = %terminal_id,
        min_level = ?cfg.min_level,
        max_level = ?cfg.max_level,
        "thresholds updated"
    );
    Ok(Json(cfg))
}

async fn put_capacity(
    State(state): State<AppState>,
    Path(terminal_id): Path<String>,
    Json(update): Json<CapacityUpdate>,
) -> ApiResult<Json<TerminalInfo>> {
    let capacity = update.tank_capacity.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let info = state.settings.upsert_capacity(&terminal_id, capacity).await?;

    // Liters in cached reports depend on the capacity.
    state.consumption.invalidate(&terminal_id).await;

    tracing::info!(terminal_id = %terminal_id, capacity_liters = ?info.capacity_liters(), "tank capacity updated");
    Ok(Json(info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumption::ConsumptionSettings;
    use crate::testing::{FakeMailer, MemoryStore};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use time::{Duration, OffsetDateTime};
    use tower::ServiceExt;

    fn app(store: &MemoryStore, mailer: &FakeMailer) -> Router {
        let alarms = AlarmService::new(
            Arc::new(store.clone()),
            Some(Arc::new(mailer.clone())),
            Duration::minutes(60),
        );
        let consumption = ConsumptionService::new(
            Arc::new(store.clone()),
            ConsumptionSettings {
                cache_ttl: std::time::Duration::from_secs(60),
                ..Default::default()
            },
        );
        router(AppState {
            alarms: Arc::new(alarms),
            consumption: Arc::new(consumption),
            thresholds: Arc::new(store.clone()),
            settings: Arc::new(store.clone()),
        })
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn healthz_answers_ok() {
        let store = MemoryStore::default();
        let res = app(&store, &FakeMailer::default())
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn thresholds_roundtrip_through_put_and_get() {
        let store = MemoryStore::default();
        let mailer = FakeMailer::default();

        let (status, _) = call(app(&store, &mailer), "GET", "/api/thresholds/T1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            app(&store, &mailer),
            "PUT",
            "/api/thresholds/T1",
            Some(json!({ "min_level": 20.0, "max_level": 85.0, "alarm_email": " ops@example.com " })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alarm_email"], "ops@example.com");

        let (status, body) = call(app(&store, &mailer), "GET", "/api/thresholds/T1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["min_level"], 20.0);
        assert_eq!(body["max_level"], 85.0);
    }

    #[tokio::test]
    async fn threshold_update_keeps_cooldown_markers() {
        let store = MemoryStore::default();
        let sent_at = OffsetDateTime::now_utc();
        store.put_config(ThresholdConfig {
            terminal_id: "T1".into(),
            min_level: Some(20.0),
            last_min_alarm_sent_at: Some(sent_at),
            ..Default::default()
        });

        let (status, _) = call(
            app(&store, &FakeMailer::default()),
            "PUT",
            "/api/thresholds/T1",
            Some(json!({ "min_level": 25.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let cfg = store.config("T1").unwrap();
        assert_eq!(cfg.min_level, Some(25.0));
        assert_eq!(cfg.last_min_alarm_sent_at, Some(sent_at));
    }

    #[tokio::test]
    async fn evaluate_returns_delivered_notifications() {
        let store = MemoryStore::default();
        let mailer = FakeMailer::default();
        store.put_config(ThresholdConfig {
            terminal_id: "T1".into(),
            min_level: Some(30.0),
            alarm_email: Some("ops@example.com".into()),
            ..Default::default()
        });

        let reading = json!({ "terminal_id": "T1", "value": 12.5, "ts": "2024-05-02T12:00:00Z" });
        let (status, body) = call(app(&store, &mailer), "POST", "/api/alarms/evaluate", Some(reading.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["kind"], "min");
        assert_eq!(mailer.sent().len(), 1);

        // Throttled on the second call.
        let (_, body) = call(app(&store, &mailer), "POST", "/api/alarms/evaluate", Some(reading)).await;
        assert!(body.as_array().unwrap().is_empty());
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn evaluate_treats_unparseable_fields_as_missing() {
        let store = MemoryStore::default();
        let mailer = FakeMailer::default();
        store.put_config(ThresholdConfig {
            terminal_id: "T1".into(),
            min_level: Some(30.0),
            alarm_email: Some("ops@example.com".into()),
            ..Default::default()
        });

        for reading in [
            json!({ "terminal_id": "T1", "value": "n.d.", "ts": "2024-05-02T12:00:00Z" }),
            json!({ "terminal_id": "T1", "value": 10, "ts": "sometime yesterday" }),
            json!({ "terminal_id": "T1", "value": null, "ts": 1714651200 }),
            json!({ "terminal_id": "T1" }),
        ] {
            let (status, body) = call(app(&store, &mailer), "POST", "/api/alarms/evaluate", Some(reading)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!([]));
        }
        assert!(mailer.sent().is_empty());
        assert_eq!(store.writes(), 0);
        assert_eq!(store.config("T1").unwrap().last_min_alarm_sent_at, None);
    }

    #[tokio::test]
    async fn evaluate_accepts_telemetry_formats() {
        let store = MemoryStore::default();
        let mailer = FakeMailer::default();
        store.put_config(ThresholdConfig {
            terminal_id: "T1".into(),
            min_level: Some(30.0),
            alarm_email: Some("ops@example.com".into()),
            ..Default::default()
        });

        let reading = json!({ "terminal_id": "T1", "value": "8,5", "ts": "02/05/2024 08:15:00" });
        let (status, body) = call(app(&store, &mailer), "POST", "/api/alarms/evaluate", Some(reading)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["kind"], "min");
        assert_eq!(body[0]["value"], 8.5);
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn evaluate_rejects_blank_terminal() {
        let store = MemoryStore::default();
        let (status, _) = call(
            app(&store, &FakeMailer::default()),
            "POST",
            "/api/alarms/evaluate",
            Some(json!({ "terminal_id": "  ", "value": 10.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn capacity_update_refreshes_cached_report() {
        let store = MemoryStore::default();
        let mailer = FakeMailer::default();
        let yesterday = OffsetDateTime::now_utc().date().previous_day().unwrap().midnight().assume_utc();
        for (hour, value) in [(1, 80.0), (7, 70.0), (13, 60.0)] {
            store.push_reading("T1", yesterday + Duration::hours(hour), value);
        }

        let router = app(&store, &mailer);
        let (_, body) = call(router.clone(), "GET", "/api/consumption/T1", None).await;
        assert_eq!(body["daily"]["percent"], 20.0);
        assert_eq!(body["daily"]["liters"], Value::Null);

        let (status, body) = call(
            router.clone(),
            "PUT",
            "/api/terminals/T1/capacity",
            Some(json!({ "tank_capacity": "1000 L" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tank_capacity"], "1000 L");

        let (_, body) = call(router, "GET", "/api/consumption/T1", None).await;
        assert_eq!(body["daily"]["liters"], 200.0);
    }

    #[tokio::test]
    async fn consumption_rows_cover_known_terminals() {
        let store = MemoryStore::default();
        store.put_config(ThresholdConfig {
            terminal_id: "A".into(),
            ..Default::default()
        });
        store.put_config(ThresholdConfig {
            terminal_id: "B".into(),
            ..Default::default()
        });

        let (status, body) = call(app(&store, &FakeMailer::default()), "GET", "/api/consumption", None).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body["rows"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["terminal_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn store_outage_maps_to_service_unavailable() {
        let store = MemoryStore::default();
        store.set_unavailable(true);

        let (status, body) = call(app(&store, &FakeMailer::default()), "GET", "/api/consumption/T1", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "temporarily unavailable");

        let (status, _) = call(app(&store, &FakeMailer::default()), "GET", "/api/thresholds/T1", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
