//! Runtime configuration.
//!
//! Everything the engine sizes itself with lives here: pool growth and
//! ceiling, how many evaluator ticks pass between signal polls, and the
//! recursion ceilings that turn runaway evaluation into clean errors.
//! Defaults are compiled in; a TOML file can override any subset:
//!
//! ```toml
//! tick-interval = 64
//!
//! [pool]
//! segment = 512
//! limit = 2097152
//! ```

use mica_core::HeapConfig;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PoolSettings {
    /// Growth quantum of the series pool, in slots.
    pub segment: usize,
    /// Hard ceiling on live slots; exceeding it raises out-of-memory.
    pub limit: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            segment: 256,
            limit: 1 << 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RuntimeConfig {
    pub pool: PoolSettings,
    /// Evaluator steps between signal-mask polls.
    pub tick_interval: u64,
    /// Nested evaluator steps before raising stack overflow.
    pub eval_depth_limit: usize,
    /// Recursion ceiling for deep bind passes.
    pub bind_depth_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            pool: PoolSettings::default(),
            tick_interval: 32,
            eval_depth_limit: 2048,
            bind_depth_limit: 256,
        }
    }
}

impl RuntimeConfig {
    /// Load a config file; missing keys fall back to the defaults.
    pub fn load(path: &Path) -> Result<RuntimeConfig, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        toml::from_str(&text).map_err(|e| format!("failed to parse {}: {}", path.display(), e))
    }

    pub fn heap_config(&self) -> HeapConfig {
        HeapConfig {
            segment: self.pool.segment,
            limit: self.pool.limit,
        }
    }
}
