//! Configuration module
//!
//! Turns command-line flags into the engine configuration.

use anyhow::Result;
use jobslot_engine::EngineConfig;
use std::time::Duration;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineConfig,
}

impl Config {
    /// Builds and validates the engine configuration
    ///
    /// Pool limits still come from the environment; flags only override the
    /// URL and the callback timeout.
    pub fn new(database_url: String, job_timeout: Option<u64>) -> Result<Self> {
        Self::with_lookup(database_url, job_timeout, |key| std::env::var(key).ok())
    }

    fn with_lookup<F>(database_url: String, job_timeout: Option<u64>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut engine = EngineConfig::new(database_url).with_overrides_from(lookup);

        if let Some(secs) = job_timeout {
            engine.job_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        engine.validate()?;
        Ok(Self { engine })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_flags_override_engine_config() {
        let config = Config::with_lookup("postgres://q@db/queue".to_string(), Some(90), no_env)
            .unwrap();
        assert_eq!(config.engine.database_url, "postgres://q@db/queue");
        assert_eq!(config.engine.job_timeout, Some(Duration::from_secs(90)));

        let config =
            Config::with_lookup("postgres://q@db/queue".to_string(), Some(0), no_env).unwrap();
        assert_eq!(config.engine.job_timeout, None);
    }

    #[test]
    fn test_pool_settings_read_without_database_url_env() {
        let env = HashMap::from([
            ("DB_MAX_CONNECTIONS", "8"),
            ("DB_ACQUIRE_TIMEOUT", "20"),
            ("JOB_TIMEOUT", "45"),
        ]);
        let lookup = |key: &str| env.get(key).map(|v| v.to_string());

        let config =
            Config::with_lookup("postgres://q@db/queue".to_string(), None, lookup).unwrap();
        assert_eq!(config.engine.max_connections, 8);
        assert_eq!(config.engine.acquire_timeout, Duration::from_secs(20));
        assert_eq!(config.engine.job_timeout, Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(Config::with_lookup("sqlite::memory:".to_string(), None, no_env).is_err());
    }
}
