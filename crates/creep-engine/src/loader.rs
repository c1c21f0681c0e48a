//! Loader: matches one pending task order to ready assets and publishes the
//! resulting work payload.

use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use creep_core::models::{normalize_resource_hints, ResourceHint, TaskPayload};
use creep_core::Queue;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use uuid::Uuid;

pub struct Loader {
    pool: PgPool,
    queue: Arc<dyn Queue>,
    queue_name: String,
}

struct ClaimedTask {
    task_id: String,
    tenant_id: String,
    resource_hints: Value,
    timeout_ms: i64,
}

struct ClaimedAsset {
    id: String,
}

impl Loader {
    pub fn new(pool: PgPool, queue: Arc<dyn Queue>, queue_name: impl Into<String>) -> Self {
        Self {
            pool,
            queue,
            queue_name: queue_name.into(),
        }
    }

    /// One scheduling pass.
    ///
    /// Claims a single PENDING task under skip-locked, locks enough READY
    /// assets for every resource hint, writes one ACTIVE lease per asset and
    /// flips the task to QUEUED, all in one transaction. The payload is
    /// published only after commit, so a crash between commit and publish
    /// leaves valid leases for the janitor's lock-timeout sweep to reclaim.
    ///
    /// Returns the published payload, or `None` when there is no claimable
    /// task or the pool cannot satisfy every hint (all-or-nothing: a short
    /// hint rolls back locks taken for earlier hints).
    pub async fn sync(&self) -> anyhow::Result<Option<TaskPayload>> {
        let mut tx = self.pool.begin().await.context("begin loader tx")?;

        let Some(task) = claim_pending_task(&mut tx).await? else {
            return Ok(None);
        };

        let hints = normalize_resource_hints(&task.resource_hints)
            .with_context(|| format!("normalize resource_hints of task {}", task.task_id))?;

        let now = Utc::now();
        let expires_at = now + ChronoDuration::milliseconds(task.timeout_ms);

        let mut claimed: Vec<ClaimedAsset> = Vec::new();
        for hint in &hints {
            let batch = claim_ready_assets(&mut tx, hint).await?;
            if batch.len() < hint.min_count as usize {
                tracing::debug!(
                    event = "creep.loader.short_inventory",
                    task_id = %task.task_id,
                    sku_category = %hint.sku_category,
                    wanted = hint.min_count,
                    got = batch.len(),
                    "insufficient ready assets; releasing claims"
                );
                return Ok(None);
            }
            lock_assets(&mut tx, &batch, &task.task_id, expires_at).await?;
            claimed.extend(batch);
        }

        let mut lease_ids = Vec::with_capacity(claimed.len());
        for asset in &claimed {
            let lease_id = Uuid::new_v4().to_string();
            insert_lease(&mut tx, &lease_id, &task, &asset.id, expires_at).await?;
            lease_ids.push(lease_id);
        }

        sqlx::query(
            r#"
            UPDATE task_orders
            SET status = 'QUEUED'
            WHERE task_id = $1
            "#,
        )
        .bind(&task.task_id)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("mark task {} queued", task.task_id))?;

        tx.commit().await.context("commit loader tx")?;

        let payload = TaskPayload {
            task_id: task.task_id,
            lease_ids,
        };
        self.publish(&payload).await;

        Ok(Some(payload))
    }

    /// Post-commit publish. A failure here is logged, not propagated: the
    /// leases stay valid and lock-timeout recovery returns the assets to the
    /// pool after `expires_at`.
    async fn publish(&self, payload: &TaskPayload) {
        let bytes = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(
                    event = "creep.loader.publish.encode_failed",
                    task_id = %payload.task_id,
                    error = %err,
                    "payload encode failed after commit"
                );
                return;
            }
        };

        if let Err(err) = self.queue.push(&self.queue_name, &[bytes]).await {
            tracing::error!(
                event = "creep.loader.publish.failed",
                task_id = %payload.task_id,
                queue = %self.queue_name,
                error = %err,
                "payload publish failed after commit; leases will be reclaimed on lock timeout"
            );
        }
    }
}

async fn claim_pending_task(
    tx: &mut Transaction<'_, Postgres>,
) -> anyhow::Result<Option<ClaimedTask>> {
    let row = sqlx::query(
        r#"
        SELECT task_id, tenant_id, resource_hints, timeout_ms
        FROM task_orders
        WHERE status = 'PENDING'
        ORDER BY priority DESC, created_at ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .fetch_optional(&mut **tx)
    .await
    .context("claim pending task")?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(ClaimedTask {
        task_id: row.try_get("task_id").context("task_id")?,
        tenant_id: row.try_get("tenant_id").context("tenant_id")?,
        resource_hints: row.try_get("resource_hints").context("resource_hints")?,
        timeout_ms: row.try_get("timeout_ms").context("timeout_ms")?,
    }))
}

/// Claim up to `min_count` READY assets matching the hint. Rows locked by
/// peers are skipped; rows this transaction already flipped to LOCKED for an
/// earlier hint no longer satisfy the READY filter.
async fn claim_ready_assets(
    tx: &mut Transaction<'_, Postgres>,
    hint: &ResourceHint,
) -> anyhow::Result<Vec<ClaimedAsset>> {
    let rows = sqlx::query(
        r#"
        SELECT id
        FROM creep_assets
        WHERE status = 'READY'
          AND sku_category = $1
          AND ($2::text IS NULL OR sku_code LIKE $2)
          AND ($3::jsonb IS NULL OR meta_spec @> $3)
        ORDER BY id
        LIMIT $4
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(&hint.sku_category)
    .bind(hint.sku_code_like())
    .bind(hint.attributes_json())
    .bind(i64::from(hint.min_count))
    .fetch_all(&mut **tx)
    .await
    .with_context(|| format!("claim ready assets for category {}", hint.sku_category))?;

    rows.into_iter()
        .map(|row| {
            Ok(ClaimedAsset {
                id: row.try_get("id").context("id")?,
            })
        })
        .collect()
}

async fn lock_assets(
    tx: &mut Transaction<'_, Postgres>,
    assets: &[ClaimedAsset],
    task_id: &str,
    lock_expires_at: DateTime<Utc>,
) -> anyhow::Result<()> {
    let ids: Vec<String> = assets.iter().map(|a| a.id.clone()).collect();
    sqlx::query(
        r#"
        UPDATE creep_assets
        SET status = 'LOCKED',
            lock_id = $2,
            lock_expires_at = $3
        WHERE id = ANY($1)
        "#,
    )
    .bind(&ids)
    .bind(task_id)
    .bind(lock_expires_at)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("lock assets for task {task_id}"))?;

    Ok(())
}

async fn insert_lease(
    tx: &mut Transaction<'_, Postgres>,
    lease_id: &str,
    task: &ClaimedTask,
    asset_id: &str,
    expires_at: DateTime<Utc>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO leases (lease_id, tenant_id, task_id, asset_id, expires_at, status)
        VALUES ($1, $2, $3, $4, $5, 'ACTIVE')
        "#,
    )
    .bind(lease_id)
    .bind(&task.tenant_id)
    .bind(&task.task_id)
    .bind(asset_id)
    .bind(expires_at)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("insert lease for asset {asset_id}"))?;

    Ok(())
}
