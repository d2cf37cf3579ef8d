//! Configuration surface (§6.2 expansion): hierarchical loading from
//! `incremental_qe.toml` (default), `incremental_qe.local.toml` (git-ignored
//! local overrides), and `INCREMENTAL_QE_*` environment variables.
//!
//! Every field has a usable default, so `EngineConfig::load()` succeeds even
//! when neither file is present — the engine does not require a config file
//! to run.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Engine-wide configuration. None of this affects query semantics — only
/// operational defaults and observability thresholds (§6.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub query: QueryDefaults,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Defaults applied when a caller doesn't override them per-call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDefaults {
    /// Whether `Engine::register` pulls a cold-start enumeration for newly
    /// registered queries by default (§4.6, §6.1).
    #[serde(default = "default_true")]
    pub cold_start: bool,

    /// Whether `QueryHandle::get_statistics` is populated by default; when
    /// false, callers must opt in per-subscription (§6.2).
    #[serde(default = "default_true")]
    pub include_stats_by_default: bool,

    /// Soft threshold on tuples touched in one flush, used only to emit a
    /// `tracing::warn!` — never a hard cutoff (no resource-limiting
    /// Non-goal is violated; this is observability, not enforcement).
    #[serde(default = "default_max_batch_tuples")]
    pub max_batch_tuples: usize,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        QueryDefaults {
            cold_start: default_true(),
            include_stats_by_default: default_true(),
            max_batch_tuples: default_max_batch_tuples(),
        }
    }
}

/// Logging configuration: level and format for the host application's
/// `tracing-subscriber` installation. The engine only emits events; it
/// never installs a subscriber itself (§6.2 "logging is a thin wrapper").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_batch_tuples() -> usize {
    100_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            query: QueryDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration by merging, in order: built-in defaults,
    /// `incremental_qe.toml`, `incremental_qe.local.toml`, then
    /// `INCREMENTAL_QE_*` environment variables (double underscore as the
    /// nesting separator, e.g. `INCREMENTAL_QE_QUERY__COLD_START=false`).
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(figment::providers::Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file("incremental_qe.toml"))
            .merge(Toml::file("incremental_qe.local.toml"))
            .merge(Env::prefixed("INCREMENTAL_QE_").split("__"))
            .extract()
    }

    /// Loads configuration from a specific file path, still allowing
    /// environment overrides.
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::from(figment::providers::Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("INCREMENTAL_QE_").split("__"))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_usable() {
        let config = EngineConfig::default();
        assert!(config.query.cold_start);
        assert!(config.query.include_stats_by_default);
        assert_eq!(config.query.max_batch_tuples, 100_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn load_succeeds_without_a_config_file() {
        let config = EngineConfig::load().expect("defaults alone must parse");
        assert_eq!(config, EngineConfig::default());
    }
}
