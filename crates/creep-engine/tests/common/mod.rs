#![allow(dead_code)]

//! Shared fixtures for the engine integration tests.
//!
//! The tests drive real scheduler passes against the Postgres named by
//! `CREEP_TEST_DATABASE_URL` and are skipped (passing) when it is unset.
//! Tests share one database, so each takes the integration lock and resets
//! the tables before seeding.

use anyhow::Context;
use async_trait::async_trait;
use creep_core::adapter::{
    Adapter, AdapterError, CostBasis, CostModel, Health, HealthStatus, ResourcePayload,
};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::{Mutex, OnceLock};
use uuid::Uuid;

pub async fn integration_lock() -> tokio::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<tokio::sync::Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| tokio::sync::Mutex::new(()))
        .lock()
        .await
}

/// Connect and migrate, or `None` when no test database is configured.
pub async fn test_pool() -> anyhow::Result<Option<PgPool>> {
    let Ok(url) = std::env::var("CREEP_TEST_DATABASE_URL") else {
        eprintln!("skipping: CREEP_TEST_DATABASE_URL not set");
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .context("connect test db")?;

    sqlx::migrate!("../../creepd/migrations")
        .run(&pool)
        .await
        .context("migrate test db")?;

    Ok(Some(pool))
}

/// Clean state between tests; rows persist in shared tables otherwise.
pub async fn reset_tables(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        TRUNCATE
          creep_assets,
          task_orders,
          leases,
          asset_events,
          asset_ledger
        RESTART IDENTITY
        CASCADE
        "#,
    )
    .execute(pool)
    .await
    .context("truncate scheduler tables")?;
    Ok(())
}

pub fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

pub async fn insert_asset(
    pool: &PgPool,
    id: &str,
    tenant_id: &str,
    sku_category: &str,
    sku_code: Option<&str>,
    meta_spec: Value,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO creep_assets (id, sku_category, sku_code, meta_spec, status, tenant_id, project_id)
        VALUES ($1, $2, $3, $4, 'READY', $5, 'project-1')
        "#,
    )
    .bind(id)
    .bind(sku_category)
    .bind(sku_code)
    .bind(meta_spec)
    .bind(tenant_id)
    .execute(pool)
    .await
    .with_context(|| format!("insert asset {id}"))?;
    Ok(())
}

pub async fn insert_task(
    pool: &PgPool,
    task_id: &str,
    tenant_id: &str,
    status: &str,
    priority: i32,
    resource_hints: Value,
    timeout_ms: i64,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO task_orders (task_id, tenant_id, status, priority, task_type, resource_hints, timeout_ms)
        VALUES ($1, $2, $3, $4, 'TICKET_SNIPER', $5, $6)
        "#,
    )
    .bind(task_id)
    .bind(tenant_id)
    .bind(status)
    .bind(priority)
    .bind(resource_hints)
    .bind(timeout_ms)
    .execute(pool)
    .await
    .with_context(|| format!("insert task {task_id}"))?;
    Ok(())
}

pub async fn insert_active_lease(
    pool: &PgPool,
    lease_id: &str,
    tenant_id: &str,
    task_id: &str,
    asset_id: &str,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO leases (lease_id, tenant_id, task_id, asset_id, expires_at, status)
        VALUES ($1, $2, $3, $4, now() + interval '60 seconds', 'ACTIVE')
        "#,
    )
    .bind(lease_id)
    .bind(tenant_id)
    .bind(task_id)
    .bind(asset_id)
    .execute(pool)
    .await
    .with_context(|| format!("insert lease {lease_id}"))?;
    Ok(())
}

pub async fn lock_asset(pool: &PgPool, id: &str, task_id: &str) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE creep_assets
        SET status = 'LOCKED',
            lock_id = $2,
            lock_expires_at = now() + interval '60 seconds'
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(task_id)
    .execute(pool)
    .await
    .with_context(|| format!("lock asset {id}"))?;
    Ok(())
}

pub async fn asset_status(pool: &PgPool, id: &str) -> anyhow::Result<String> {
    sqlx::query_scalar("SELECT status FROM creep_assets WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .with_context(|| format!("fetch asset {id} status"))
}

pub async fn task_state(pool: &PgPool, task_id: &str) -> anyhow::Result<(String, Option<String>)> {
    sqlx::query_as("SELECT status, result_code FROM task_orders WHERE task_id = $1")
        .bind(task_id)
        .fetch_one(pool)
        .await
        .with_context(|| format!("fetch task {task_id} state"))
}

pub async fn lease_status(pool: &PgPool, lease_id: &str) -> anyhow::Result<Option<String>> {
    sqlx::query_scalar("SELECT status FROM leases WHERE lease_id = $1")
        .bind(lease_id)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("fetch lease {lease_id} status"))
}

pub async fn count_events(
    pool: &PgPool,
    asset_id: &str,
    event_type: &str,
) -> anyhow::Result<i64> {
    sqlx::query_scalar(
        r#"
        SELECT count(*)
        FROM asset_events
        WHERE asset_id = $1
          AND event_type = $2
        "#,
    )
    .bind(asset_id)
    .bind(event_type)
    .fetch_one(pool)
    .await
    .context("count asset events")
}

pub async fn count_burns(pool: &PgPool, asset_id: &str) -> anyhow::Result<i64> {
    sqlx::query_scalar(
        r#"
        SELECT count(*)
        FROM asset_ledger
        WHERE asset_id = $1
          AND direction = 'OUT'
          AND reason = 'TASK_BURN'
        "#,
    )
    .bind(asset_id)
    .fetch_one(pool)
    .await
    .context("count ledger burns")
}

/// Deterministic adapter standing in for a live vendor.
pub struct ScriptedAdapter {
    pub health: Health,
    pub acquire_error: Option<&'static str>,
    pub released: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    pub fn healthy() -> Self {
        Self {
            health: Health::Healthy,
            acquire_error: None,
            released: Mutex::new(Vec::new()),
        }
    }

    pub fn unhealthy() -> Self {
        Self {
            health: Health::Unhealthy,
            ..Self::healthy()
        }
    }

    pub fn quota_limited() -> Self {
        Self {
            acquire_error: Some("quota"),
            ..Self::healthy()
        }
    }

    pub fn released_ids(&self) -> Vec<String> {
        self.released.lock().expect("released poisoned").clone()
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    async fn acquire(&self, specs: &Map<String, Value>) -> Result<ResourcePayload, AdapterError> {
        match self.acquire_error {
            Some("quota") => Err(AdapterError::QuotaExceeded("scripted".to_string())),
            Some(_) => Err(AdapterError::ResourceUnavailable("scripted".to_string())),
            None => Ok(ResourcePayload {
                asset_id: specs
                    .get("asset_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                credentials: Map::new(),
                metadata: Map::new(),
            }),
        }
    }

    async fn release(&self, asset_id: &str) -> Result<bool, AdapterError> {
        self.released
            .lock()
            .expect("released poisoned")
            .push(asset_id.to_string());
        Ok(true)
    }

    async fn check_health(&self, asset_id: &str) -> Result<HealthStatus, AdapterError> {
        Ok(HealthStatus::now(asset_id, self.health))
    }

    fn cost_model(&self) -> CostModel {
        CostModel {
            model: CostBasis::Flat,
            unit_cost: 0.0,
            currency: "USD".to_string(),
            notes: None,
        }
    }
}
