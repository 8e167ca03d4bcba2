use std::fs;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShqError};

/// Engine-wide knobs shared by the compiler and the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Max fetch jobs executing concurrently against backends.
    pub fetch_parallelism: usize,
    /// Wait bound for resolving a fetch inside a transaction.
    pub transaction_fetch_timeout_ms: u64,
    /// Max rule applications while eliminating logical tables.
    pub rewrite_match_limit: usize,
    /// Copy `LIMIT` into the SQL sent to each backend.
    pub push_down_limit: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_parallelism: 16,
            transaction_fetch_timeout_ms: 60_000,
            rewrite_match_limit: 64,
            push_down_limit: true,
        }
    }
}

impl EngineConfig {
    pub fn transaction_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_fetch_timeout_ms)
    }

    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.fetch_parallelism == 0 {
            return Err(ShqError::InvalidConfig(
                "fetch_parallelism must be at least 1".to_string(),
            ));
        }
        if self.transaction_fetch_timeout_ms == 0 {
            return Err(ShqError::InvalidConfig(
                "transaction_fetch_timeout_ms must be positive".to_string(),
            ));
        }
        if self.rewrite_match_limit == 0 {
            return Err(ShqError::InvalidConfig(
                "rewrite_match_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a JSON config; missing keys keep their defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: EngineConfig =
            serde_json::from_str(s).map_err(|e| ShqError::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_json(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        Self::from_json_str(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = EngineConfig::from_json_str(r#"{"fetch_parallelism": 4}"#).expect("config");
        assert_eq!(cfg.fetch_parallelism, 4);
        assert_eq!(cfg.rewrite_match_limit, 64);
        assert_eq!(cfg.transaction_fetch_timeout(), Duration::from_secs(60));
        assert!(cfg.push_down_limit);
    }

    #[test]
    fn rejects_zero_parallelism() {
        let err = EngineConfig::from_json_str(r#"{"fetch_parallelism": 0}"#).unwrap_err();
        assert!(matches!(err, ShqError::InvalidConfig(_)));
    }
}
