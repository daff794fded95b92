/*!
common/src/lib.rs

Shared configuration types for Prism.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader merging a default config file with an override file
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
        }
    }
}

/// Remote model service config (used if `llm.adapter = "remote"`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    /// Ask the service to ground answers with live web search
    pub web_search: Option<bool>,
}

/// LLM top-level config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub adapter: Option<String>, // "remote", "none"
    pub remote: Option<RemoteLlmConfig>,
}

/// Coordinator scheduling limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Concurrency budget shared by every active request
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    #[serde(default = "default_request_deadline")]
    pub request_deadline_seconds: u64,
    /// Per-call timeout for workers without an explicit override
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout_seconds: u64,
    pub citation_cap: Option<usize>,
}

fn default_max_concurrency() -> u32 {
    4
}

fn default_request_deadline() -> u64 {
    90
}

fn default_worker_timeout() -> u64 {
    45
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            request_deadline_seconds: default_request_deadline(),
            worker_timeout_seconds: default_worker_timeout(),
            citation_cap: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_seconds)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_seconds)
    }
}

/// Article extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_seconds: u64,
    pub user_agent: Option<String>,
    /// Extracted text shorter than this is treated as a failed extraction
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_min_chars() -> usize {
    200
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_fetch_timeout(),
            user_agent: None,
            min_chars: default_min_chars(),
        }
    }
}

/// Fixed-window quota on analysis types per user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_types")]
    pub max_types_per_window: u32,
    #[serde(default = "default_window")]
    pub window_seconds: u64,
}

fn default_max_types() -> u32 {
    50
}

fn default_window() -> u64 {
    86_400
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_types_per_window: default_max_types(),
            window_seconds: default_window(),
        }
    }
}

/// Live search options forwarded to the model service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub enabled: Option<bool>,
    /// "day", "week", "month", "year"
    pub recency: Option<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    pub max_results: Option<u32>,
}

impl SearchConfig {
    /// Overlay `other` on top of `self`; set fields in `other` win.
    pub fn merged(&self, other: &SearchConfig) -> SearchConfig {
        SearchConfig {
            enabled: other.enabled.or(self.enabled),
            recency: other.recency.clone().or_else(|| self.recency.clone()),
            domains: if other.domains.is_empty() {
                self.domains.clone()
            } else {
                other.domains.clone()
            },
            max_results: other.max_results.or(self.max_results),
        }
    }
}

/// Per analysis type overrides (`[workers.<type>]`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub timeout_seconds: Option<u64>,
    pub weight: Option<u32>,
    /// Replaces the built-in dependency set when present
    pub depends_on: Option<Vec<String>>,
    pub model: Option<String>,
    pub search: Option<SearchConfig>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub llm: Option<LlmConfig>,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub workers: BTreeMap<String, WorkerConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    /// Standard lookup used by the binaries: `config.default.toml` in the working
    /// directory, overridden by `explicit` (which must exist) or else `config.toml`.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let default_path = Path::new("config.default.toml");
        let override_path = match explicit {
            Some(p) if !p.exists() => anyhow::bail!("Config file not found: {}", p.display()),
            Some(p) => Some(p),
            None => Some(Path::new("config.toml")),
        };
        Self::load_with_defaults(Some(default_path), override_path).await
    }

    pub fn worker(&self, type_id: &str) -> Option<&WorkerConfig> {
        self.workers.get(type_id)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn explicit_missing_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/prism.toml"))).await.unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: Config = toml::from_str("").expect("parse config");
        assert_eq!(cfg.server.port, 8000);
        assert_eq!(cfg.coordinator.max_concurrency, 4);
        assert_eq!(cfg.coordinator.request_deadline(), Duration::from_secs(90));
        assert!(!cfg.quota.enabled);
        assert!(cfg.llm.is_none());
        assert!(cfg.workers.is_empty());
    }

    #[test]
    fn worker_sections_parse() {
        let toml = r#"
            [workers.bias]
            timeout_seconds = 20
            weight = 2

            [workers.expert]
            depends_on = ["factcheck"]

            [workers.factcheck.search]
            recency = "week"
            domains = ["reuters.com"]
        "#;

        let cfg: Config = toml::from_str(toml).expect("parse config");
        let bias = cfg.worker("bias").expect("bias section");
        assert_eq!(bias.timeout_seconds, Some(20));
        assert_eq!(bias.weight, Some(2));
        assert_eq!(
            cfg.worker("expert").and_then(|w| w.depends_on.clone()),
            Some(vec!["factcheck".to_string()])
        );
        let search = cfg.worker("factcheck").and_then(|w| w.search.clone()).expect("search");
        assert_eq!(search.recency.as_deref(), Some("week"));
        assert_eq!(search.domains, vec!["reuters.com".to_string()]);
    }

    #[test]
    fn search_config_overlay() {
        let base = SearchConfig {
            enabled: Some(true),
            recency: Some("month".into()),
            domains: vec!["apnews.com".into()],
            max_results: Some(5),
        };
        let overlay = SearchConfig {
            recency: Some("day".into()),
            ..Default::default()
        };

        let merged = base.merged(&overlay);
        assert_eq!(merged.enabled, Some(true));
        assert_eq!(merged.recency.as_deref(), Some("day"));
        assert_eq!(merged.domains, vec!["apnews.com".to_string()]);
        assert_eq!(merged.max_results, Some(5));
    }

    #[tokio::test]
    async fn override_file_takes_precedence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");

        let mut f = std::fs::File::create(&default_path).expect("create default");
        writeln!(
            f,
            "[server]\nport = 9000\n\n[coordinator]\nmax_concurrency = 8\nworker_timeout_seconds = 30"
        )
        .expect("write default");
        let mut f = std::fs::File::create(&override_path).expect("create override");
        writeln!(f, "[coordinator]\nmax_concurrency = 2").expect("write override");

        let cfg = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .expect("load config");
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.coordinator.max_concurrency, 2);
        assert_eq!(cfg.coordinator.worker_timeout_seconds, 30);
    }

    #[tokio::test]
    async fn missing_files_yield_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        let cfg = Config::load_with_defaults(Some(&missing), None)
            .await
            .expect("load config");
        assert_eq!(cfg.extraction.min_chars, 200);
    }
}
