//! Janitor: background reconciliation of stuck and cooled assets back into
//! the READY pool.

use anyhow::Context;
use sqlx::{PgPool, Row};

use crate::events::{insert_asset_event, EVENT_COOLING_ENDED, EVENT_LOCK_TIMEOUT_RECOVERY};

const SELECT_EXPIRED_LOCKS_SQL: &str = r#"
SELECT id, tenant_id
FROM creep_assets
WHERE status = 'LOCKED'
  AND lock_expires_at < now()
ORDER BY lock_expires_at
LIMIT $1
FOR UPDATE SKIP LOCKED
"#;

const RECOVER_LOCKS_SQL: &str = r#"
UPDATE creep_assets
SET status = 'READY',
    lock_id = NULL,
    lock_expires_at = NULL,
    fail_count = fail_count + 1
WHERE id = ANY($1)
"#;

const SELECT_EXPIRED_COOLING_SQL: &str = r#"
SELECT id, tenant_id
FROM creep_assets
WHERE status = 'COOLING'
  AND cool_down_until < now()
ORDER BY cool_down_until
LIMIT $1
FOR UPDATE SKIP LOCKED
"#;

const RECOVER_COOLING_SQL: &str = r#"
UPDATE creep_assets
SET status = 'READY',
    cool_down_until = NULL
WHERE id = ANY($1)
"#;

// Reclaiming a locked asset leaves its lease behind; revoke it so the asset
// can be leased again without violating the one-ACTIVE-lease rule.
const REVOKE_RECLAIMED_LEASES_SQL: &str = r#"
UPDATE leases
SET status = 'REVOKED'
WHERE asset_id = ANY($1)
  AND status = 'ACTIVE'
"#;

pub struct Janitor {
    pool: PgPool,
    batch_size: i64,
    max_process_limit: i64,
}

/// Asset ids returned to the pool by one `run_once` pass.
#[derive(Debug, Default)]
pub struct JanitorPass {
    pub recovered: Vec<String>,
    pub cooled: Vec<String>,
}

impl Janitor {
    pub fn new(pool: PgPool, batch_size: i64, max_process_limit: i64) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
            max_process_limit: max_process_limit.max(1),
        }
    }

    /// Execute one pass of each reconciliation sweep.
    pub async fn run_once(&self) -> anyhow::Result<JanitorPass> {
        let recovered = self.recover_lock_timeouts().await?;
        let cooled = self.expire_cooling().await?;
        Ok(JanitorPass { recovered, cooled })
    }

    /// Release assets whose locks have expired, counting the failure against
    /// each asset and revoking the stale leases.
    pub async fn recover_lock_timeouts(&self) -> anyhow::Result<Vec<String>> {
        self.sweep(
            SELECT_EXPIRED_LOCKS_SQL,
            RECOVER_LOCKS_SQL,
            Some(REVOKE_RECLAIMED_LEASES_SQL),
            EVENT_LOCK_TIMEOUT_RECOVERY,
        )
        .await
    }

    /// Return assets whose cooling window has elapsed. Their leases were
    /// already released at settlement.
    pub async fn expire_cooling(&self) -> anyhow::Result<Vec<String>> {
        self.sweep(
            SELECT_EXPIRED_COOLING_SQL,
            RECOVER_COOLING_SQL,
            None,
            EVENT_COOLING_ENDED,
        )
        .await
    }

    /// Claim-update-commit in bounded batches. Each iteration commits
    /// independently, so a failure mid-sweep keeps earlier batches. An empty
    /// claim drops the transaction (rollback) and ends the sweep.
    async fn sweep(
        &self,
        select_sql: &str,
        update_sql: &str,
        lease_update_sql: Option<&str>,
        event_type: &str,
    ) -> anyhow::Result<Vec<String>> {
        let mut processed: Vec<String> = Vec::new();

        while (processed.len() as i64) < self.max_process_limit {
            let mut tx = self.pool.begin().await.context("begin janitor tx")?;

            let rows = sqlx::query(select_sql)
                .bind(self.batch_size)
                .fetch_all(&mut *tx)
                .await
                .with_context(|| format!("claim janitor batch for {event_type}"))?;

            if rows.is_empty() {
                break;
            }

            let mut batch: Vec<(String, String)> = Vec::with_capacity(rows.len());
            for row in rows {
                let id: String = row.try_get("id").context("id")?;
                let tenant_id: String = row.try_get("tenant_id").context("tenant_id")?;
                batch.push((id, tenant_id));
            }

            let ids: Vec<String> = batch.iter().map(|(id, _)| id.clone()).collect();
            sqlx::query(update_sql)
                .bind(&ids)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("recover janitor batch for {event_type}"))?;

            if let Some(lease_sql) = lease_update_sql {
                sqlx::query(lease_sql)
                    .bind(&ids)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("revoke leases for {event_type}"))?;
            }

            for (id, tenant_id) in &batch {
                insert_asset_event(&mut tx, tenant_id, id, event_type, None, None).await?;
            }

            tx.commit().await.context("commit janitor batch")?;

            tracing::info!(
                event = "creep.janitor.batch",
                sweep = event_type,
                recovered = ids.len(),
                "janitor batch committed"
            );

            let short_batch = (ids.len() as i64) < self.batch_size;
            processed.extend(ids);
            if short_batch {
                break;
            }
        }

        Ok(processed)
    }
}
