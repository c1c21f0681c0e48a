//! Append-only audit and accounting rows, written inside the caller's
//! settlement or sweep transaction.

use anyhow::Context;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

pub const EVENT_TASK_SUCCESS: &str = "TASK_SUCCESS";
pub const EVENT_TASK_FAIL: &str = "TASK_FAIL";
pub const EVENT_LOCK_TIMEOUT_RECOVERY: &str = "LOCK_TIMEOUT_RECOVERY";
pub const EVENT_COOLING_ENDED: &str = "COOLING_ENDED";

pub const LEDGER_REASON_TASK_BURN: &str = "TASK_BURN";

pub async fn insert_asset_event(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    asset_id: &str,
    event_type: &str,
    severity: Option<&str>,
    error_code: Option<&str>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO asset_events
          (event_id, tenant_id, asset_id, event_type, severity, error_code, occurred_at, recorded_at, version)
        VALUES ($1, $2, $3, $4, $5, $6, now(), now(), 1)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(tenant_id)
    .bind(asset_id)
    .bind(event_type)
    .bind(severity)
    .bind(error_code)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("insert {event_type} event for asset {asset_id}"))?;

    Ok(())
}

pub async fn insert_task_burn(
    tx: &mut Transaction<'_, Postgres>,
    asset_id: &str,
    tenant_id: &str,
    project_id: Option<&str>,
    amount: f64,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO asset_ledger
          (asset_id, tenant_id, project_id, direction, reason, amount, created_at)
        VALUES ($1, $2, $3, 'OUT', $4, $5, now())
        "#,
    )
    .bind(asset_id)
    .bind(tenant_id)
    .bind(project_id)
    .bind(LEDGER_REASON_TASK_BURN)
    .bind(amount)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("insert ledger burn for asset {asset_id}"))?;

    Ok(())
}
