//! Adapter construction by name, with environment-driven configuration.

use super::{Adapter, MockAdapter};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds adapters by registry name.
///
/// Adapter config is assembled from `ADAPTER_<NAME>_*` environment variables
/// (prefix stripped, keys lowercased), with explicit overrides winning.
pub struct AdapterFactory;

impl AdapterFactory {
    pub fn create(
        name: &str,
        overrides: &HashMap<String, String>,
    ) -> crate::Result<Arc<dyn Adapter>> {
        let prefix = format!("ADAPTER_{}_", name.to_uppercase());
        let mut config = load_prefixed_env(&prefix);
        config.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

        match name {
            "mock" => Ok(Arc::new(MockAdapter::new(&config))),
            other => Err(crate::Error::msg(format!(
                "adapter '{other}' is not registered"
            ))),
        }
    }
}

/// Environment variables starting with `prefix`, keyed by the stripped,
/// lowercased remainder.
pub fn load_prefixed_env(prefix: &str) -> HashMap<String, String> {
    let prefix = prefix.to_uppercase();
    std::env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(&prefix)
                .map(|rest| (rest.to_lowercase(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_adapter_is_rejected() {
        assert!(AdapterFactory::create("does-not-exist", &HashMap::new()).is_err());
    }

    #[test]
    fn mock_adapter_is_registered() {
        assert!(AdapterFactory::create("mock", &HashMap::new()).is_ok());
    }

    #[test]
    fn prefixed_env_is_stripped_and_lowercased() {
        std::env::set_var("ADAPTER_FACTORYTEST_LATENCY_MS", "25");
        std::env::set_var("ADAPTER_FACTORYTEST_CURRENCY", "EUR");
        std::env::set_var("ADAPTER_OTHER_LATENCY_MS", "99");

        let config = load_prefixed_env("ADAPTER_FACTORYTEST_");
        assert_eq!(Some(&"25".to_string()), config.get("latency_ms"));
        assert_eq!(Some(&"EUR".to_string()), config.get("currency"));
        assert!(!config.contains_key("other_latency_ms"));

        std::env::remove_var("ADAPTER_FACTORYTEST_LATENCY_MS");
        std::env::remove_var("ADAPTER_FACTORYTEST_CURRENCY");
        std::env::remove_var("ADAPTER_OTHER_LATENCY_MS");
    }
}
