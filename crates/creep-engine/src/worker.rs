//! Worker: consumes queued task payloads, executes them through the vendor
//! adapter and settles task + leases + assets atomically.

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use creep_core::adapter::{Adapter, AdapterError, Health};
use creep_core::models::{ResultCode, TaskPayload, TaskStatus};
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::dispenser::Dispenser;
use crate::events::{insert_asset_event, insert_task_burn, EVENT_TASK_FAIL, EVENT_TASK_SUCCESS};

/// Flat accounting charge per asset per settlement.
const TASK_BURN_AMOUNT: f64 = 0.01;

pub struct Worker {
    pool: PgPool,
    dispenser: Dispenser,
    adapter: Arc<dyn Adapter>,
    poll_interval: Duration,
    cool_down: ChronoDuration,
}

struct TaskRow {
    task_type: String,
    status: String,
}

struct LeaseRow {
    lease_id: String,
    task_id: String,
    asset_id: Option<String>,
    tenant_id: Option<String>,
    project_id: Option<String>,
    meta_spec: Option<Value>,
}

impl Worker {
    pub fn new(
        pool: PgPool,
        dispenser: Dispenser,
        adapter: Arc<dyn Adapter>,
        poll_interval: Duration,
        cool_down_secs: i64,
    ) -> Self {
        Self {
            pool,
            dispenser,
            adapter,
            poll_interval,
            cool_down: ChronoDuration::seconds(cool_down_secs),
        }
    }

    /// Consume payloads until ctrl-c. An error from `process_one` propagates
    /// so the supervisor can crash-restart the worker; the janitor reclaims
    /// any assets left locked by the lost payload.
    pub async fn run_forever(&self) -> anyhow::Result<()> {
        tracing::info!(event = "creep.worker.started", "worker started");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!(event = "creep.worker.shutdown", "worker shutting down");
                    return Ok(());
                }
                res = self.dispenser.acquire() => {
                    match res? {
                        None => tokio::time::sleep(self.poll_interval).await,
                        Some(payload) => self.process_one(&payload).await?,
                    }
                }
            }
        }
    }

    /// Process a single task payload and settle the related leases.
    pub async fn process_one(&self, payload: &str) -> anyhow::Result<()> {
        let parsed: TaskPayload = match serde_json::from_str(payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::error!(
                    event = "creep.worker.payload.invalid",
                    error = %err,
                    payload,
                    "dropping unparseable payload"
                );
                return Ok(());
            }
        };
        if parsed.task_id.is_empty() {
            tracing::error!(
                event = "creep.worker.payload.no_task",
                payload,
                "dropping payload without task_id"
            );
            return Ok(());
        }

        // Hydrate in a read transaction; adapter execution happens outside it
        // so vendor latency never holds row locks.
        let (task, leases) = {
            let mut tx = self.pool.begin().await.context("begin hydrate tx")?;

            let Some(task) = fetch_task(&mut tx, &parsed.task_id).await? else {
                tracing::error!(
                    event = "creep.worker.task.missing",
                    task_id = %parsed.task_id,
                    "task not found during hydration; dropping payload"
                );
                return Ok(());
            };

            // Re-delivery guard: only a QUEUED task may settle.
            if task.status != TaskStatus::Queued.as_str() {
                tracing::warn!(
                    event = "creep.worker.task.already_settled",
                    task_id = %parsed.task_id,
                    status = %task.status,
                    "dropping duplicate delivery"
                );
                return Ok(());
            }

            let leases = fetch_leases(&mut tx, &parsed.lease_ids).await?;
            (task, leases)
        };

        let found: HashSet<&str> = leases.iter().map(|l| l.lease_id.as_str()).collect();
        let missing_leases: Vec<&str> = parsed
            .lease_ids
            .iter()
            .map(String::as_str)
            .filter(|id| !found.contains(id))
            .collect();
        let task_mismatch = leases.iter().any(|l| l.task_id != parsed.task_id);
        let missing_assets = leases.iter().any(|l| l.asset_id.is_none());

        if !missing_leases.is_empty() || task_mismatch || missing_assets {
            if !missing_leases.is_empty() {
                tracing::error!(
                    event = "creep.worker.leases.missing",
                    task_id = %parsed.task_id,
                    missing = ?missing_leases,
                    "requested leases absent from store"
                );
            }
            if task_mismatch {
                tracing::error!(
                    event = "creep.worker.leases.task_mismatch",
                    task_id = %parsed.task_id,
                    "lease/task mismatch detected"
                );
            }
            if missing_assets {
                tracing::error!(
                    event = "creep.worker.leases.no_asset",
                    task_id = %parsed.task_id,
                    "lease without asset detected"
                );
            }

            let code = if leases.is_empty() {
                ResultCode::ResourceError
            } else {
                ResultCode::DataInconsistency
            };
            return self
                .settle_failure(&parsed.task_id, &leases, &parsed.lease_ids, code)
                .await;
        }

        let success = self.execute(&task.task_type, &leases).await;

        if success {
            self.settle_success(&parsed.task_id, &leases).await
        } else {
            self.settle_failure(
                &parsed.task_id,
                &leases,
                &parsed.lease_ids,
                ResultCode::ExecutionFailed,
            )
            .await
        }
    }

    /// Run the adapter against every lease. `false` means the task failed.
    /// Every acquired resource is released on all paths; release failures are
    /// logged and never flip the outcome.
    async fn execute(&self, task_type: &str, leases: &[LeaseRow]) -> bool {
        tracing::debug!(
            event = "creep.worker.execute",
            task_type,
            leases = leases.len(),
            "executing task against adapter"
        );

        let mut acquired: Vec<String> = Vec::new();
        let outcome = self.acquire_and_check(leases, &mut acquired).await;

        for asset_id in &acquired {
            if let Err(err) = self.adapter.release(asset_id).await {
                tracing::warn!(
                    event = "creep.worker.release_failed",
                    asset_id = %asset_id,
                    error = %err,
                    "adapter failed to release asset"
                );
            }
        }

        match outcome {
            Ok(healthy) => healthy,
            Err(err) => {
                tracing::error!(
                    event = "creep.worker.adapter_error",
                    error = %err,
                    "adapter failure while executing task"
                );
                false
            }
        }
    }

    async fn acquire_and_check(
        &self,
        leases: &[LeaseRow],
        acquired: &mut Vec<String>,
    ) -> Result<bool, AdapterError> {
        let empty = Map::new();
        for lease in leases {
            let specs = lease
                .meta_spec
                .as_ref()
                .and_then(Value::as_object)
                .unwrap_or(&empty);
            let payload = self.adapter.acquire(specs).await?;
            let asset_id = if payload.asset_id.is_empty() {
                lease.asset_id.clone().unwrap_or_default()
            } else {
                payload.asset_id
            };
            acquired.push(asset_id);
        }

        for asset_id in acquired.iter() {
            let health = self.adapter.check_health(asset_id).await?;
            if health.status == Health::Unhealthy {
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn settle_success(&self, task_id: &str, leases: &[LeaseRow]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await.context("begin settle tx")?;

        if !settle_task(&mut tx, task_id, TaskStatus::Success, None).await? {
            return Ok(());
        }

        let lease_ids: Vec<String> = leases.iter().map(|l| l.lease_id.clone()).collect();
        if !lease_ids.is_empty() {
            sqlx::query(
                r#"
                UPDATE leases
                SET status = 'RELEASED'
                WHERE lease_id = ANY($1)
                  AND status = 'ACTIVE'
                "#,
            )
            .bind(&lease_ids)
            .execute(&mut *tx)
            .await
            .context("release leases")?;
        }

        let asset_ids: Vec<String> = leases.iter().filter_map(|l| l.asset_id.clone()).collect();
        if !asset_ids.is_empty() {
            let cool_down_until = Utc::now() + self.cool_down;
            // Guarded on our own lock: an asset the janitor already reclaimed
            // (and possibly re-leased) belongs to another actor by now.
            sqlx::query(
                r#"
                UPDATE creep_assets
                SET status = 'COOLING',
                    lock_id = NULL,
                    lock_expires_at = NULL,
                    cool_down_until = $2
                WHERE id = ANY($1)
                  AND status = 'LOCKED'
                  AND lock_id = $3
                "#,
            )
            .bind(&asset_ids)
            .bind(cool_down_until)
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .context("cool assets")?;

            for lease in leases {
                let (Some(asset_id), Some(tenant_id)) = (&lease.asset_id, &lease.tenant_id) else {
                    continue;
                };
                insert_asset_event(&mut tx, tenant_id, asset_id, EVENT_TASK_SUCCESS, Some("INFO"), None)
                    .await?;
                insert_task_burn(
                    &mut tx,
                    asset_id,
                    tenant_id,
                    lease.project_id.as_deref(),
                    TASK_BURN_AMOUNT,
                )
                .await?;
            }
        }

        tx.commit().await.context("commit settle tx")?;

        tracing::info!(
            event = "creep.worker.settled",
            task_id,
            outcome = "success",
            assets = asset_ids.len(),
            "task settled"
        );
        Ok(())
    }

    /// Settle a failed task: requested leases go REVOKED (a no-op for absent
    /// ids) and every hydrated asset is banned from the pool.
    async fn settle_failure(
        &self,
        task_id: &str,
        leases: &[LeaseRow],
        requested_lease_ids: &[String],
        code: ResultCode,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await.context("begin settle tx")?;

        if !settle_task(&mut tx, task_id, TaskStatus::Failed, Some(code)).await? {
            return Ok(());
        }

        if !requested_lease_ids.is_empty() {
            sqlx::query(
                r#"
                UPDATE leases
                SET status = 'REVOKED'
                WHERE lease_id = ANY($1)
                  AND status = 'ACTIVE'
                "#,
            )
            .bind(requested_lease_ids)
            .execute(&mut *tx)
            .await
            .context("revoke leases")?;
        }

        let asset_ids: Vec<String> = leases.iter().filter_map(|l| l.asset_id.clone()).collect();
        if !asset_ids.is_empty() {
            sqlx::query(
                r#"
                UPDATE creep_assets
                SET status = 'BANNED',
                    lock_id = NULL,
                    lock_expires_at = NULL
                WHERE id = ANY($1)
                  AND status = 'LOCKED'
                  AND lock_id = $2
                "#,
            )
            .bind(&asset_ids)
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .context("ban assets")?;

            for lease in leases {
                let (Some(asset_id), Some(tenant_id)) = (&lease.asset_id, &lease.tenant_id) else {
                    continue;
                };
                insert_asset_event(
                    &mut tx,
                    tenant_id,
                    asset_id,
                    EVENT_TASK_FAIL,
                    Some("ERROR"),
                    Some(code.as_str()),
                )
                .await?;
                insert_task_burn(
                    &mut tx,
                    asset_id,
                    tenant_id,
                    lease.project_id.as_deref(),
                    TASK_BURN_AMOUNT,
                )
                .await?;
            }
        }

        tx.commit().await.context("commit settle tx")?;

        tracing::info!(
            event = "creep.worker.settled",
            task_id,
            outcome = "failure",
            result_code = code.as_str(),
            assets = asset_ids.len(),
            "task settled"
        );
        Ok(())
    }
}

/// Flip the task to its terminal status, guarded on QUEUED. Returns `false`
/// (after dropping the transaction) when another settlement won the race.
async fn settle_task(
    tx: &mut Transaction<'_, Postgres>,
    task_id: &str,
    status: TaskStatus,
    code: Option<ResultCode>,
) -> anyhow::Result<bool> {
    let updated = sqlx::query(
        r#"
        UPDATE task_orders
        SET status = $2,
            finished_at = now(),
            result_code = $3
        WHERE task_id = $1
          AND status = 'QUEUED'
        "#,
    )
    .bind(task_id)
    .bind(status.as_str())
    .bind(code.map(ResultCode::as_str))
    .execute(&mut **tx)
    .await
    .with_context(|| format!("settle task {task_id}"))?;

    if updated.rows_affected() == 0 {
        tracing::warn!(
            event = "creep.worker.settle.raced",
            task_id,
            "task no longer QUEUED at settlement; skipping"
        );
        return Ok(false);
    }
    Ok(true)
}

async fn fetch_task(
    tx: &mut Transaction<'_, Postgres>,
    task_id: &str,
) -> anyhow::Result<Option<TaskRow>> {
    let row = sqlx::query(
        r#"
        SELECT task_type, status
        FROM task_orders
        WHERE task_id = $1
        "#,
    )
    .bind(task_id)
    .fetch_optional(&mut **tx)
    .await
    .with_context(|| format!("fetch task {task_id}"))?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(TaskRow {
        task_type: row.try_get("task_type").context("task_type")?,
        status: row.try_get("status").context("status")?,
    }))
}

async fn fetch_leases(
    tx: &mut Transaction<'_, Postgres>,
    lease_ids: &[String],
) -> anyhow::Result<Vec<LeaseRow>> {
    if lease_ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        r#"
        SELECT l.lease_id, l.task_id, l.asset_id, a.tenant_id, a.project_id, a.meta_spec
        FROM leases l
        LEFT JOIN creep_assets a ON l.asset_id = a.id
        WHERE l.lease_id = ANY($1)
        ORDER BY l.lease_id
        "#,
    )
    .bind(lease_ids)
    .fetch_all(&mut **tx)
    .await
    .context("fetch leases")?;

    rows.into_iter()
        .map(|row| {
            Ok(LeaseRow {
                lease_id: row.try_get("lease_id").context("lease_id")?,
                task_id: row.try_get("task_id").context("task_id")?,
                asset_id: row.try_get("asset_id").context("asset_id")?,
                tenant_id: row.try_get("tenant_id").context("tenant_id")?,
                project_id: row.try_get("project_id").context("project_id")?,
                meta_spec: row.try_get("meta_spec").context("meta_spec")?,
            })
        })
        .collect()
}
