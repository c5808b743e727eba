//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::language;

/// Default wall-clock limit per run.
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 30;

/// Configuration shared by the engine and the session surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Session workspace directory. `None` picks a fresh directory under the
    /// system temp dir.
    pub workspace_root: Option<PathBuf>,

    /// Quiet period before an auto-run fires, in milliseconds.
    pub debounce_ms: u64,

    /// Minimum spacing between streamed output flushes, in milliseconds.
    pub flush_interval_ms: u64,

    /// How long the kernel stays `Restarted` before reverting to `Idle`.
    pub restart_settle_ms: u64,

    /// Wall-clock limit per run. `None` disables the limit.
    pub run_timeout_secs: Option<u64>,

    /// Language that receives the shared-memory bridge snippet.
    pub primary_language: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_root: None,
            debounce_ms: 600,
            flush_interval_ms: 100,
            restart_settle_ms: 1000,
            run_timeout_secs: Some(DEFAULT_RUN_TIMEOUT_SECS),
            primary_language: "python".to_string(),
        }
    }
}

impl EngineConfig {
    /// Create a config rooted at an explicit workspace directory.
    pub fn for_workspace(root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: Some(root.into()),
            ..Self::default()
        }
    }

    /// Create a config from defaults overridden by `CELLRUN_*` environment
    /// variables. Unparseable values are ignored; a timeout of `0` disables
    /// the limit.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(root) = var("CELLRUN_WORKSPACE")
            && !root.trim().is_empty()
        {
            config.workspace_root = Some(PathBuf::from(root));
        }
        if let Some(secs) = parse_u64(&var, "CELLRUN_TIMEOUT_SECS") {
            config.run_timeout_secs = Some(secs).filter(|s| *s > 0);
        }
        if let Some(ms) = parse_u64(&var, "CELLRUN_DEBOUNCE_MS") {
            config.debounce_ms = ms;
        }

        config
    }

    /// Debounce quiet period.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Streamed output flush interval.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Delay before `Restarted` reverts to `Idle`.
    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    /// Wall-clock limit for a run of `language`: the configured limit,
    /// raised to the language's minimum. `None` when limits are disabled.
    pub fn run_timeout(&self, language: &str) -> Option<Duration> {
        let configured = self.run_timeout_secs?;
        let floor = language::lookup(language)
            .and_then(|spec| spec.min_timeout_secs)
            .unwrap_or(0);
        Some(Duration::from_secs(configured.max(floor)))
    }
}

fn parse_u64(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let value = var(key)?;
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not an integer", key, value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.workspace_root.is_none());
        assert_eq!(config.debounce(), Duration::from_millis(600));
        assert_eq!(config.flush_interval(), Duration::from_millis(100));
        assert_eq!(config.run_timeout("python"), Some(Duration::from_secs(30)));
        assert_eq!(config.primary_language, "python");
    }

    #[test]
    fn test_for_workspace() {
        let config = EngineConfig::for_workspace("/tmp/ws");
        assert_eq!(config.workspace_root, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(config.restart_settle(), Duration::from_secs(1));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"debounce_ms": 250, "run_timeout_secs": 5}"#).unwrap();
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.run_timeout("sh"), Some(Duration::from_secs(5)));
        assert_eq!(config.flush_interval_ms, 100);
    }

    #[test]
    fn test_language_timeout_floor() {
        let config = EngineConfig::default();
        assert_eq!(config.run_timeout("r"), Some(Duration::from_secs(60)));
        assert_eq!(config.run_timeout("unknown"), Some(Duration::from_secs(30)));

        let generous = EngineConfig {
            run_timeout_secs: Some(120),
            ..EngineConfig::default()
        };
        assert_eq!(generous.run_timeout("r"), Some(Duration::from_secs(120)));

        let unlimited = EngineConfig {
            run_timeout_secs: None,
            ..EngineConfig::default()
        };
        assert_eq!(unlimited.run_timeout("r"), None);
    }

    #[test]
    fn test_from_vars() {
        let vars = |key: &str| match key {
            "CELLRUN_WORKSPACE" => Some("/tmp/from-env".to_string()),
            "CELLRUN_TIMEOUT_SECS" => Some("0".to_string()),
            "CELLRUN_DEBOUNCE_MS" => Some("not a number".to_string()),
            _ => None,
        };
        let config = EngineConfig::from_vars(vars);
        assert_eq!(config.workspace_root, Some(PathBuf::from("/tmp/from-env")));
        assert_eq!(config.run_timeout("python"), None);
        assert_eq!(config.debounce_ms, 600);

        let config = EngineConfig::from_vars(|key| (key == "CELLRUN_TIMEOUT_SECS").then(|| " 45 ".to_string()));
        assert_eq!(config.workspace_root, None);
        assert_eq!(config.run_timeout("python"), Some(Duration::from_secs(45)));
    }
}
