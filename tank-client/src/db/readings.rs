use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::ReadingPoint;

/// Fetch a time-ordered level profile for a single terminal over `[start, end)`.
pub async fn readings_in_range(
    pool: &PgPool,
    terminal_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<ReadingPoint>> {
    let rows = sqlx::query_as::<_, ReadingPoint>(
        r#"
        SELECT
            ts,
            value
        FROM tank_readings
        WHERE terminal_id = $1
          AND ts >= $2
          AND ts <  $3
        ORDER BY ts
        "#,
    )
    .bind(terminal_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Distinct terminals that reported at least once since `since`.
pub async fn terminals_with_readings_since(
    pool: &PgPool,
    since: OffsetDateTime,
) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT DISTINCT terminal_id
        FROM tank_readings
        WHERE ts >= $1
        ORDER BY terminal_id
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}
