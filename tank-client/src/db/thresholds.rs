use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::ThresholdConfig;

/// One of the two cooldown markers stored on `threshold_configs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CooldownMarker {
    Min,
    Max,
}

pub async fn threshold_config(pool: &PgPool, terminal_id: &str) -> Result<Option<ThresholdConfig>> {
    let row = sqlx::query_as::<_, ThresholdConfig>(
        r#"
        SELECT
            terminal_id,
            min_level,
            max_level,
            alarm_email,
            last_min_alarm_sent_at,
            last_max_alarm_sent_at
        FROM threshold_configs
        WHERE terminal_id = $1
        "#,
    )
    .bind(terminal_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

pub async fn configured_terminals(pool: &PgPool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT terminal_id FROM threshold_configs ORDER BY terminal_id")
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Insert or update the operator-editable part of a configuration.
///
/// Cooldown markers of an existing row are left untouched.
pub async fn upsert_threshold_config(
    pool: &PgPool,
    terminal_id: &str,
    min_level: Option<f64>,
    max_level: Option<f64>,
    alarm_email: Option<&str>,
) -> Result<ThresholdConfig> {
    let row = sqlx::query_as::<_, ThresholdConfig>(
        r#"
        INSERT INTO threshold_configs (terminal_id, min_level, max_level, alarm_email, updated_at)
        VALUES ($1, $2, $3, $4, now())
        ON CONFLICT (terminal_id) DO UPDATE
           SET min_level   = EXCLUDED.min_level,
               max_level   = EXCLUDED.max_level,
               alarm_email = EXCLUDED.alarm_email,
               updated_at  = now()
        RETURNING
            terminal_id,
            min_level,
            max_level,
            alarm_email,
            last_min_alarm_sent_at,
            last_max_alarm_sent_at
        "#,
    )
    .bind(terminal_id)
    .bind(min_level)
    .bind(max_level)
    .bind(alarm_email)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Atomically take the right to send an alarm.
///
/// Sets the marker to `now` only if it is unset or not newer than `cutoff`
/// (i.e. `now - throttle`). Returns `false` when another evaluation already
/// holds a fresh marker.
pub async fn claim_cooldown_marker(
    pool: &PgPool,
    terminal_id: &str,
    marker: CooldownMarker,
    now: OffsetDateTime,
    cutoff: OffsetDateTime,
) -> Result<bool> {
    let sql = match marker {
        CooldownMarker::Min => {
            r#"
            UPDATE threshold_configs
               SET last_min_alarm_sent_at = $2
             WHERE terminal_id = $1
               AND (last_min_alarm_sent_at IS NULL OR last_min_alarm_sent_at <= $3)
            "#
        }
        CooldownMarker::Max => {
            r#"
            UPDATE threshold_configs
               SET last_max_alarm_sent_at = $2
             WHERE terminal_id = $1
               AND (last_max_alarm_sent_at IS NULL OR last_max_alarm_sent_at <= $3)
            "#
        }
    };

    let result = sqlx::query(sql)
        .bind(terminal_id)
        .bind(now)
        .bind(cutoff)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Undo a claim after a failed delivery, restoring the previous marker.
///
/// Only applies while the marker still holds `claimed_at`, so a newer claim is
/// never overwritten.
pub async fn release_cooldown_marker(
    pool: &PgPool,
    terminal_id: &str,
    marker: CooldownMarker,
    claimed_at: OffsetDateTime,
    previous: Option<OffsetDateTime>,
) -> Result<bool> {
    let sql = match marker {
        CooldownMarker::Min => {
            r#"
            UPDATE threshold_configs
               SET last_min_alarm_sent_at = $3
             WHERE terminal_id = $1
               AND last_min_alarm_sent_at = $2
            "#
        }
        CooldownMarker::Max => {
            r#"
            UPDATE threshold_configs
               SET last_max_alarm_sent_at = $3
             WHERE terminal_id = $1
               AND last_max_alarm_sent_at = $2
            "#
        }
    };

    let result = sqlx::query(sql)
        .bind(terminal_id)
        .bind(claimed_at)
        .bind(previous)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Reset the selected markers of one terminal in a single-row update.
pub async fn clear_cooldown_markers(
    pool: &PgPool,
    terminal_id: &str,
    clear_min: bool,
    clear_max: bool,
) -> Result<()> {
    if !clear_min && !clear_max {
        return Ok(());
    }

    sqlx::query(
        r#"
        UPDATE threshold_configs
           SET last_min_alarm_sent_at = CASE WHEN $2 THEN NULL ELSE last_min_alarm_sent_at END,
               last_max_alarm_sent_at = CASE WHEN $3 THEN NULL ELSE last_max_alarm_sent_at END
         WHERE terminal_id = $1
        "#,
    )
    .bind(terminal_id)
    .bind(clear_min)
    .bind(clear_max)
    .execute(pool)
    .await?;

    Ok(())
}
