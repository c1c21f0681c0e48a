//! Vendor adapter contract.
//!
//! The worker executes task orders through this capability set; adapters wrap
//! a concrete upstream provider (proxy vendor, account farm, credential
//! broker). The core awaits every call and treats the adapter as opaque.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod factory;
pub mod mock;

pub use factory::AdapterFactory;
pub use mock::MockAdapter;

/// Failure categories surfaced by adapters.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The upstream provider enforced a rate limit or quota violation.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The upstream provider could not deliver the requested resource.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Availability of a provisioned asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub asset_id: String,
    pub status: Health,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    pub fn now(asset_id: impl Into<String>, status: Health) -> Self {
        Self {
            asset_id: asset_id.into(),
            status,
            detail: None,
            checked_at: Utc::now(),
        }
    }
}

/// How an adapter accrues cost for usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostBasis {
    PerRequest,
    PerHour,
    Flat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostModel {
    pub model: CostBasis,
    pub unit_cost: f64,
    /// ISO-4217 currency code.
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Payload returned by an adapter when a resource is acquired.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcePayload {
    pub asset_id: String,
    #[serde(default)]
    pub credentials: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Contract every vendor adapter implements.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Provision or fetch a resource matching the lease's `meta_spec`.
    async fn acquire(&self, specs: &Map<String, Value>) -> Result<ResourcePayload, AdapterError>;

    /// Return or tear down a resource. Idempotent; callers log failures
    /// instead of propagating them.
    async fn release(&self, asset_id: &str) -> Result<bool, AdapterError>;

    /// Validate that a resource remains usable.
    async fn check_health(&self, asset_id: &str) -> Result<HealthStatus, AdapterError>;

    /// Billing metadata for this adapter.
    fn cost_model(&self) -> CostModel;
}
