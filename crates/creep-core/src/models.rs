//! Data model shared by the loader, janitor and worker: status vocabularies,
//! resource hints with their matching rules, and the queue payload shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle of a leasable asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetStatus {
    Ready,
    Locked,
    Cooling,
    Banned,
}

impl AssetStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetStatus::Ready => "READY",
            AssetStatus::Locked => "LOCKED",
            AssetStatus::Cooling => "COOLING",
            AssetStatus::Banned => "BANNED",
        }
    }
}

/// Lifecycle of a task order. Terminal states never revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Queued,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
        }
    }
}

/// Lifecycle of a lease binding a task to one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStatus {
    Active,
    Released,
    Revoked,
}

impl LeaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LeaseStatus::Active => "ACTIVE",
            LeaseStatus::Released => "RELEASED",
            LeaseStatus::Revoked => "REVOKED",
        }
    }
}

/// Terminal result code recorded on a failed task order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    ExecutionFailed,
    ResourceError,
    DataInconsistency,
}

impl ResultCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::ExecutionFailed => "EXECUTION_FAILED",
            ResultCode::ResourceError => "RESOURCE_ERROR",
            ResultCode::DataInconsistency => "DATA_INCONSISTENCY",
        }
    }
}

/// Payload published by the Loader and consumed by the Worker.
///
/// Wire shape is exactly `{"task_id": "...", "lease_ids": ["...", ...]}`;
/// unknown fields are ignored on decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task_id: String,
    #[serde(default)]
    pub lease_ids: Vec<String>,
}

/// Minimal in-memory view of an asset, as seen by the matcher.
#[derive(Debug, Clone)]
pub struct AssetSnapshot {
    pub asset_id: String,
    pub sku_category: String,
    pub sku_code: Option<String>,
    pub meta_spec: Map<String, Value>,
}

/// A declarative match over category, sku_code glob and attribute containment,
/// carried on task orders as an ordered list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceHint {
    pub sku_category: String,
    #[serde(default)]
    pub sku_code: Option<String>,
    #[serde(default)]
    pub attributes: Option<Map<String, Value>>,
    #[serde(default = "default_min_count")]
    pub min_count: u32,
}

fn default_min_count() -> u32 {
    1
}

impl ResourceHint {
    /// Pure matching predicate.
    ///
    /// * Categories must match exactly.
    /// * `sku_code` supports `*` globbing ("ip.*"); an unset hint code matches
    ///   any asset code.
    /// * `attributes` requires containment: every hint key must be present in
    ///   the asset's `meta_spec` with an equal value.
    pub fn matches(&self, asset: &AssetSnapshot) -> bool {
        if asset.sku_category != self.sku_category {
            return false;
        }

        if let Some(pattern) = &self.sku_code {
            let code = asset.sku_code.as_deref().unwrap_or("");
            if !glob_match(pattern, code) {
                return false;
            }
        }

        if let Some(attributes) = &self.attributes {
            if !contains_all(&asset.meta_spec, attributes) {
                return false;
            }
        }

        true
    }

    /// The hint's sku_code translated for SQL `LIKE` (`*` becomes `%`).
    pub fn sku_code_like(&self) -> Option<String> {
        self.sku_code.as_deref().map(|p| p.replace('*', "%"))
    }

    /// The hint's attributes as a JSONB containment operand, if any.
    pub fn attributes_json(&self) -> Option<Value> {
        self.attributes.as_ref().map(|a| Value::Object(a.clone()))
    }
}

/// Normalize a `resource_hints` column value into an ordered hint list.
///
/// Producers write either a structured JSON array or a JSON string containing
/// one; both are accepted. `min_count` defaults to 1 and must be at least 1.
pub fn normalize_resource_hints(raw: &Value) -> crate::Result<Vec<ResourceHint>> {
    let parsed_from_string;
    let hints_value = match raw {
        Value::String(inner) => {
            parsed_from_string = serde_json::from_str::<Value>(inner)
                .map_err(|err| crate::Error::msg(format!("resource_hints string is not JSON: {err}")))?;
            &parsed_from_string
        }
        other => other,
    };

    let hints: Vec<ResourceHint> = serde_json::from_value(hints_value.clone())
        .map_err(|err| crate::Error::msg(format!("resource_hints is not a hint list: {err}")))?;

    for hint in &hints {
        if hint.sku_category.is_empty() {
            return Err(crate::Error::msg("resource hint missing sku_category"));
        }
        if hint.min_count < 1 {
            return Err(crate::Error::msg(format!(
                "resource hint for {} has min_count {}; expected at least 1",
                hint.sku_category, hint.min_count
            )));
        }
    }

    Ok(hints)
}

/// `*`-only glob match, anchored at both ends.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star_p, star_t)) = star {
            // Backtrack: let the last `*` absorb one more character.
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

fn contains_all(haystack: &Map<String, Value>, needle: &Map<String, Value>) -> bool {
    needle
        .iter()
        .all(|(key, value)| haystack.get(key) == Some(value))
}
