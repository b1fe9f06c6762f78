//! Runtime configuration.
//!
//! Every field has a default, so a config file only needs the keys it
//! changes:
//!
//! ```json
//! { "engine": { "step_budget": 5000 }, "cache": { "negative_ttl_ms": 1000 } }
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    /// Sent to the user when a turn fails.
    pub fallback_message: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            fallback_message: "Sorry, something went wrong. Please try again.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Statements and loop iterations one run may execute.
    pub step_budget: u64,
    /// `WAIT` durations up to this many seconds sleep in-process; longer ones suspend.
    pub max_inline_wait_secs: f64,
    /// Completion requests one `LLM` call may make while resolving tool calls.
    pub max_tool_rounds: usize,
    /// Nesting limit for tools invoked from `LLM` inside another tool.
    pub max_tool_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_budget: 100_000,
            max_inline_wait_secs: 5.0,
            max_tool_rounds: 3,
            max_tool_depth: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a failed compilation is served before the same source is retried.
    pub negative_ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            negative_ttl_ms: 30_000,
        }
    }
}

impl CacheConfig {
    pub fn negative_ttl(&self) -> Duration {
        Duration::from_millis(self.negative_ttl_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

impl RuntimeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.step_budget == 0 {
            return Err(ConfigError::Invalid {
                key: "engine.step_budget",
                message: "must be positive".to_string(),
            });
        }
        let wait = self.engine.max_inline_wait_secs;
        if wait.is_nan() || wait < 0.0 {
            return Err(ConfigError::Invalid {
                key: "engine.max_inline_wait_secs",
                message: "must be a non-negative number".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "retry.max_attempts",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
