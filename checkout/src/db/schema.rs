use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Parked carts
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS pending_orders (
  session_id TEXT PRIMARY KEY,
  label TEXT NOT NULL,
  created_ms BIGINT NOT NULL,
  paused_ms BIGINT NOT NULL,
  snapshot TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_pending_orders_paused ON pending_orders(paused_ms);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
