//! Engine configuration.
//!
//! Values start from [`EngineConfig::default()`]; a JSON document can
//! override any subset of fields. Objects merge per key, everything else is
//! replaced, and `null` leaves the default in place.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{DiveLogError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pie slices kept before the rest fold into "Other".
    pub pie_top_categories: usize,
    /// Dive summaries included with a filter or search result.
    pub preview_limit: usize,
    /// Default `limit` for `list_dives`.
    pub list_limit: usize,
    pub histogram_bins: usize,
    pub histogram_min_bins: usize,
    pub histogram_max_bins: usize,
    /// Preview size for continuous-depth filter results.
    pub detail_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            pie_top_categories: 7,
            preview_limit: 5,
            list_limit: 10,
            histogram_bins: 10,
            histogram_min_bins: 3,
            histogram_max_bins: 50,
            detail_limit: 10,
        }
    }
}

impl EngineConfig {
    /// Merges a partial JSON document over the defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let user: Value = serde_json::from_str(json)
            .map_err(|e| DiveLogError::Config(format!("invalid JSON: {}", e)))?;
        Self::from_value(user)
    }

    pub fn from_value(user: Value) -> Result<Self> {
        let defaults = serde_json::to_value(EngineConfig::default())
            .map_err(|e| DiveLogError::Config(e.to_string()))?;
        let config: EngineConfig = serde_json::from_value(deep_merge(defaults, user))
            .map_err(|e| DiveLogError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a config file. A missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(?path, "config file not found, using defaults");
            return Ok(EngineConfig::default());
        }
        debug!(?path, "loading config from file");
        let content = std::fs::read_to_string(path)
            .map_err(|e| DiveLogError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        let limits = [
            ("pie_top_categories", self.pie_top_categories),
            ("preview_limit", self.preview_limit),
            ("list_limit", self.list_limit),
            ("histogram_min_bins", self.histogram_min_bins),
            ("detail_limit", self.detail_limit),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, value)| *value == 0) {
            return Err(DiveLogError::Config(format!("{} must be at least 1", name)));
        }
        if self.histogram_min_bins > self.histogram_max_bins {
            return Err(DiveLogError::Config(format!(
                "histogram_min_bins ({}) exceeds histogram_max_bins ({})",
                self.histogram_min_bins, self.histogram_max_bins
            )));
        }
        if !(self.histogram_min_bins..=self.histogram_max_bins).contains(&self.histogram_bins) {
            return Err(DiveLogError::Config(format!(
                "histogram_bins ({}) must be between {} and {}",
                self.histogram_bins, self.histogram_min_bins, self.histogram_max_bins
            )));
        }
        Ok(())
    }

    /// Clamps a requested bin count into the configured range.
    pub fn clamp_bins(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.histogram_bins)
            .clamp(self.histogram_min_bins, self.histogram_max_bins)
    }
}

/// Recursive merge of two JSON values. Objects merge per key, arrays and
/// primitives are replaced, and nulls in `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}
