//! Mock adapter simulating real-world provider behavior for local runs and CI.

use super::{
    Adapter, AdapterError, CostBasis, CostModel, Health, HealthStatus, ResourcePayload,
};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

const DEFAULT_LATENCY_MS: f64 = 150.0;
const DEFAULT_LATENCY_JITTER_MS: f64 = 100.0;
const DEFAULT_RATE_LIMIT_PROBABILITY: f64 = 0.05;
const DEFAULT_PROVIDER_ERROR_PROBABILITY: f64 = 0.02;
const DEFAULT_SUCCESS_RATE: f64 = 0.8;

/// Simulates vendor latency, rate limiting, provider outages and flaky health.
///
/// Randomness is per-instance; tests inject a seeded RNG.
pub struct MockAdapter {
    latency_ms: f64,
    latency_jitter_ms: f64,
    rate_limit_probability: f64,
    provider_error_probability: f64,
    success_rate: f64,
    cost: CostModel,
    rng: Mutex<StdRng>,
}

impl MockAdapter {
    pub fn new(config: &HashMap<String, String>) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_rng(config: &HashMap<String, String>, rng: StdRng) -> Self {
        let get = |key: &str, default: f64| -> f64 {
            config
                .get(key)
                .and_then(|raw| raw.parse::<f64>().ok())
                .unwrap_or(default)
        };

        let cost = CostModel {
            model: CostBasis::PerRequest,
            unit_cost: get("unit_cost", 0.0),
            currency: config
                .get("currency")
                .cloned()
                .unwrap_or_else(|| "USD".to_string()),
            notes: Some("Mock adapter incurs no real cost.".to_string()),
        };

        Self {
            latency_ms: get("latency_ms", DEFAULT_LATENCY_MS),
            latency_jitter_ms: get("latency_jitter_ms", DEFAULT_LATENCY_JITTER_MS),
            rate_limit_probability: get("rate_limit_probability", DEFAULT_RATE_LIMIT_PROBABILITY),
            provider_error_probability: get(
                "provider_error_probability",
                DEFAULT_PROVIDER_ERROR_PROBABILITY,
            ),
            success_rate: get("success_rate", DEFAULT_SUCCESS_RATE),
            cost,
            rng: Mutex::new(rng),
        }
    }

    /// Draw latency and a failure roll under one lock, then sleep unlocked.
    fn draw(&self) -> (Duration, f64) {
        let mut rng = self.rng.lock().expect("mock adapter rng poisoned");
        let jitter = if self.latency_jitter_ms > 0.0 {
            rng.gen_range(-self.latency_jitter_ms..=self.latency_jitter_ms)
        } else {
            0.0
        };
        let total_ms = (self.latency_ms + jitter).max(0.0);
        (Duration::from_secs_f64(total_ms / 1000.0), rng.gen::<f64>())
    }

    async fn simulate_call(&self) -> Result<f64, AdapterError> {
        let (latency, roll) = self.draw();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if roll < self.rate_limit_probability {
            return Err(AdapterError::QuotaExceeded(
                "rate limit encountered during mock request".to_string(),
            ));
        }
        if roll < self.rate_limit_probability + self.provider_error_probability {
            return Err(AdapterError::ResourceUnavailable(
                "provider error encountered during mock request".to_string(),
            ));
        }
        Ok(roll)
    }

    fn build_credentials(&self, specs: &Map<String, Value>) -> Map<String, Value> {
        let mut rng = self.rng.lock().expect("mock adapter rng poisoned");
        let mut credentials = Map::new();
        credentials.insert(
            "token".to_string(),
            specs
                .get("token")
                .cloned()
                .unwrap_or_else(|| Value::String(format!("mock-token-{}", rng.gen_range(1000..10000)))),
        );
        credentials.insert(
            "endpoint".to_string(),
            specs
                .get("endpoint")
                .cloned()
                .unwrap_or_else(|| Value::String("https://mock.vendor.local".to_string())),
        );
        credentials
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn acquire(&self, specs: &Map<String, Value>) -> Result<ResourcePayload, AdapterError> {
        self.simulate_call().await?;

        let asset_id = match specs.get("asset_id") {
            Some(Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => {
                let mut rng = self.rng.lock().expect("mock adapter rng poisoned");
                rng.gen_range(1..=1_000_000u32).to_string()
            }
        };

        let mut metadata = Map::new();
        metadata.insert("specs".to_string(), Value::Object(specs.clone()));

        Ok(ResourcePayload {
            asset_id,
            credentials: self.build_credentials(specs),
            metadata,
        })
    }

    async fn release(&self, _asset_id: &str) -> Result<bool, AdapterError> {
        self.simulate_call().await?;
        Ok(true)
    }

    async fn check_health(&self, asset_id: &str) -> Result<HealthStatus, AdapterError> {
        let roll = self.simulate_call().await?;
        let status = if roll < self.success_rate {
            Health::Healthy
        } else {
            Health::Unhealthy
        };
        Ok(HealthStatus::now(asset_id, status))
    }

    fn cost_model(&self) -> CostModel {
        self.cost.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quiet_config(overrides: &[(&str, &str)]) -> HashMap<String, String> {
        let mut config: HashMap<String, String> = [
            ("latency_ms", "0"),
            ("latency_jitter_ms", "0"),
            ("rate_limit_probability", "0"),
            ("provider_error_probability", "0"),
            ("success_rate", "1.0"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in overrides {
            config.insert(k.to_string(), v.to_string());
        }
        config
    }

    fn seeded(config: &HashMap<String, String>) -> MockAdapter {
        MockAdapter::with_rng(config, StdRng::seed_from_u64(7))
    }

    #[tokio::test]
    async fn acquire_echoes_requested_asset_id() {
        let adapter = seeded(&quiet_config(&[]));
        let specs = json!({"asset_id": "asset-9", "endpoint": "https://vendor.example"})
            .as_object()
            .cloned()
            .unwrap();

        let payload = adapter.acquire(&specs).await.unwrap();
        assert_eq!("asset-9", payload.asset_id);
        assert_eq!(
            Some(&Value::String("https://vendor.example".to_string())),
            payload.credentials.get("endpoint")
        );
        assert_eq!(Some(&json!({"specs": specs})["specs"]), payload.metadata.get("specs"));
    }

    #[tokio::test]
    async fn forced_rate_limit_yields_quota_error() {
        let adapter = seeded(&quiet_config(&[("rate_limit_probability", "1.0")]));
        let err = adapter.acquire(&Map::new()).await.unwrap_err();
        assert!(matches!(err, AdapterError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn forced_provider_error_yields_unavailable() {
        let adapter = seeded(&quiet_config(&[("provider_error_probability", "1.0")]));
        let err = adapter.release("asset-1").await.unwrap_err();
        assert!(matches!(err, AdapterError::ResourceUnavailable(_)));
    }

    #[tokio::test]
    async fn success_rate_drives_health() {
        let healthy = seeded(&quiet_config(&[]));
        let status = healthy.check_health("asset-1").await.unwrap();
        assert_eq!(Health::Healthy, status.status);

        let unhealthy = seeded(&quiet_config(&[("success_rate", "0.0")]));
        let status = unhealthy.check_health("asset-1").await.unwrap();
        assert_eq!(Health::Unhealthy, status.status);
    }

    #[tokio::test]
    async fn cost_model_defaults_to_free_per_request() {
        let adapter = seeded(&quiet_config(&[]));
        let cost = adapter.cost_model();
        assert_eq!(CostBasis::PerRequest, cost.model);
        assert_eq!(0.0, cost.unit_cost);
        assert_eq!("USD", cost.currency);
    }
}
