use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::pending::model::{PendingOrder, PendingOrderSummary};
use crate::pending::repository::PendingOrderRepository;

/// SQLx-backed implementation of PendingOrderRepository.
/// The snapshot itself is stored as JSON; only listing columns are broken out.
pub struct SqlxPendingOrderRepository {
    pool: AnyPool,
}

impl SqlxPendingOrderRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PendingOrderRepository for SqlxPendingOrderRepository {
    async fn save(&self, order: &PendingOrder) -> anyhow::Result<()> {
        let snapshot = serde_json::to_string(order).context("serialize pending order")?;

        sqlx::query(
            r#"
INSERT INTO pending_orders (session_id, label, created_ms, paused_ms, snapshot)
VALUES (?, ?, ?, ?, ?)
ON CONFLICT (session_id) DO UPDATE SET
  label = excluded.label,
  created_ms = excluded.created_ms,
  paused_ms = excluded.paused_ms,
  snapshot = excluded.snapshot;
"#,
        )
        .bind(order.session_id.to_string())
        .bind(order.label.clone())
        .bind(order.created_at.timestamp_millis())
        .bind(order.paused_at.timestamp_millis())
        .bind(snapshot)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_by_id(&self, session_id: &Uuid) -> anyhow::Result<Option<PendingOrder>> {
        let row = sqlx::query(
            r#"
SELECT snapshot
FROM pending_orders
WHERE session_id = ?;
"#,
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                let snapshot: String = r.get("snapshot");
                let order = serde_json::from_str(&snapshot)
                    .with_context(|| format!("malformed snapshot for session {session_id}"))?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, session_id: &Uuid) -> anyhow::Result<()> {
        sqlx::query(r#"DELETE FROM pending_orders WHERE session_id = ?;"#)
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list(&self, limit: usize) -> anyhow::Result<Vec<PendingOrderSummary>> {
        let rows = sqlx::query(
            r#"
SELECT session_id, label, created_ms, paused_ms
FROM pending_orders
ORDER BY paused_ms DESC
LIMIT ?;
"#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for r in rows {
            match row_to_summary(&r) {
                Ok(s) => out.push(s),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the listing
                    tracing::warn!(error = %e, "skipping malformed pending order row");
                }
            }
        }

        Ok(out)
    }
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_summary(r: &sqlx::any::AnyRow) -> anyhow::Result<PendingOrderSummary> {
    let id_str: String = r.get("session_id");
    let session_id = Uuid::parse_str(&id_str).context("invalid session_id")?;

    Ok(PendingOrderSummary {
        session_id,
        label: r.get::<String, _>("label"),
        created_at: ms_to_datetime(r.get("created_ms"))?,
        paused_at: ms_to_datetime(r.get("paused_ms"))?,
    })
}

fn ms_to_datetime(v: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(v).ok_or_else(|| anyhow!("timestamp out of range: {v}"))
}
