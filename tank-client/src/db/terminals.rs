use anyhow::Result;
use sqlx::PgPool;

use crate::domain::TerminalInfo;

pub async fn terminal_info(pool: &PgPool, terminal_id: &str) -> Result<Option<TerminalInfo>> {
    let row = sqlx::query_as::<_, TerminalInfo>(
        r#"
        SELECT
            terminal_id,
            serial,
            tank_capacity,
            updated_at
        FROM terminals
        WHERE terminal_id = $1
        "#,
    )
    .bind(terminal_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Record the serial number the telemetry service resolved for a terminal.
pub async fn upsert_serial(pool: &PgPool, terminal_id: &str, serial: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO terminals (terminal_id, serial, updated_at)
        VALUES ($1, $2, now())
        ON CONFLICT (terminal_id) DO UPDATE
           SET serial = EXCLUDED.serial,
               updated_at = now()
         WHERE terminals.serial IS DISTINCT FROM EXCLUDED.serial
        "#,
    )
    .bind(terminal_id)
    .bind(serial)
    .execute(pool)
    .await?;

    Ok(())
}

/// Store the free-form capacity text; parsing happens at read time.
pub async fn upsert_capacity(
    pool: &PgPool,
    terminal_id: &str,
    tank_capacity: Option<&str>,
) -> Result<TerminalInfo> {
    let row = sqlx::query_as::<_, TerminalInfo>(
        r#"
        INSERT INTO terminals (terminal_id, tank_capacity, updated_at)
        VALUES ($1, $2, now())
        ON CONFLICT (terminal_id) DO UPDATE
           SET tank_capacity = EXCLUDED.tank_capacity,
               updated_at = now()
        RETURNING
            terminal_id,
            serial,
            tank_capacity,
            updated_at
        "#,
    )
    .bind(terminal_id)
    .bind(tank_capacity)
    .fetch_one(pool)
    .await?;

    Ok(row)
}
