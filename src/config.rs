//! Configuration for the resolver.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (TRAILER_RESOLVER_BIND, TRAILER_RESOLVER_PROXY)
//! 2. Config file
//! 3. Defaults
//!
//! Config file discovery:
//! - $TRAILER_RESOLVER_CONFIG if set
//! - .trailer-resolver/config.yaml in the current directory or its parents
//! - ~/.trailer-resolver/config.yaml

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::{AdmissionConfig, CacheConfig, HealthConfig, ScoringConfig, TimeoutBudget};

pub const CONFIG_ENV: &str = "TRAILER_RESOLVER_CONFIG";
pub const BIND_ENV: &str = "TRAILER_RESOLVER_BIND";
pub const PROXY_ENV: &str = "TRAILER_RESOLVER_PROXY";

const CONFIG_DIR: &str = ".trailer-resolver";
const CONFIG_NAME: &str = "config.yaml";

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub budget: TimeoutBudget,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (default: 127.0.0.1:8787)
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Base URL of the metadata provider
    #[serde(default)]
    pub metadata_url: Option<String>,

    /// Candidate search providers, queried concurrently
    #[serde(default)]
    pub search: Vec<SearchProviderConfig>,

    /// Extraction instances, in initial preference order
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    /// Egress proxy for outbound calls (http, https or socks5 URL)
    #[serde(default)]
    pub proxy: Option<String>,

    /// Timeout of metadata and search calls (default: 3000ms)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout() -> u64 {
    3_000
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            metadata_url: None,
            search: Vec::new(),
            backends: Vec::new(),
            proxy: None,
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl ProvidersConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchProviderConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    pub url: String,
}

/// Validated configuration with its source
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub settings: ConfigFile,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ConfigFile {
    /// Check budgets, TTLs and thresholds
    pub fn validate(&self) -> Result<()> {
        self.budget.validate().context("Invalid budget section")?;
        self.cache.validate().context("Invalid cache section")?;
        self.scoring.validate().context("Invalid scoring section")?;

        if self.admission.max_concurrent == 0 {
            anyhow::bail!("admission.max_concurrent must be greater than zero");
        }

        self.bind_addr()?;

        let mut ids = std::collections::HashSet::new();
        for backend in &self.providers.backends {
            if !ids.insert(backend.id.as_str()) {
                anyhow::bail!("Duplicate backend id '{}'", backend.id);
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .with_context(|| format!("Invalid server.bind address '{}'", self.server.bind))
    }

    /// Apply overrides from `lookup` (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup(BIND_ENV).filter(|v| !v.is_empty()) {
            self.server.bind = bind;
        }
        if let Some(proxy) = lookup(PROXY_ENV).filter(|v| !v.is_empty()) {
            self.providers.proxy = Some(proxy);
        }
    }
}

/// First `.trailer-resolver/config.yaml` in `start` or its parents
fn find_config_in_parents(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_NAME);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Find config file from the environment, the working tree or the home directory
fn find_config_file() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV) {
        if !explicit.is_empty() {
            return Some(PathBuf::from(explicit));
        }
    }

    if let Some(found) = std::env::current_dir()
        .ok()
        .and_then(|cwd| find_config_in_parents(&cwd))
    {
        return Some(found);
    }

    let home_config = dirs::home_dir()?.join(CONFIG_DIR).join(CONFIG_NAME);
    home_config.exists().then_some(home_config)
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let config_file = find_config_file();

    let mut settings = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };
    settings.apply_overrides(|key| std::env::var(key).ok());
    settings.validate()?;

    Ok(ResolvedConfig {
        settings,
        config_file,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let config_dir = dir.join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        let config_path = config_dir.join(CONFIG_NAME);
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", body).unwrap();
        config_path
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = ConfigFile::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.server.bind, "127.0.0.1:8787");
        assert_eq!(settings.budget.pipeline_budget_ms, 8_000);
        assert_eq!(settings.providers.request_timeout_ms, 3_000);
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            temp.path(),
            r#"
server:
  bind: 0.0.0.0:9000
budget:
  pipeline_budget_ms: 7000
  hedge_after_ms: 800
admission:
  max_concurrent: 4
cache:
  negative_ttl_seconds: 600
providers:
  metadata_url: http://meta.local
  search:
    - name: videos
      url: http://search.local
  backends:
    - id: a
      url: http://a.local
    - id: b
      url: http://b.local
  proxy: socks5://127.0.0.1:9050
"#,
        );

        let settings = load_config_file(&path).unwrap();
        assert_eq!(settings.server.bind, "0.0.0.0:9000");
        assert_eq!(settings.budget.pipeline_budget_ms, 7_000);
        assert_eq!(settings.budget.hedge_after_ms, Some(800));
        // Unset fields keep their defaults
        assert_eq!(settings.budget.caller_timeout_ms, 10_000);
        assert_eq!(settings.admission.max_concurrent, 4);
        assert_eq!(settings.admission.max_queue, 64);
        assert_eq!(settings.cache.negative_ttl_seconds, 600);
        assert_eq!(settings.providers.search[0].name, "videos");
        assert_eq!(settings.providers.backends.len(), 2);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_discovery_walks_parents() {
        let temp = TempDir::new().unwrap();
        let expected = write_config(temp.path(), "server:\n  bind: 127.0.0.1:1\n");
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config_in_parents(&nested), Some(expected));
    }

    #[test]
    fn test_budget_hierarchy_rejected() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            temp.path(),
            "budget:\n  caller_timeout_ms: 5000\n  pipeline_budget_ms: 8000\n",
        );
        let settings = load_config_file(&path).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_negative_ttl_must_be_shorter() {
        let mut settings = ConfigFile::default();
        settings.cache.negative_ttl_seconds = settings.cache.positive_ttl_seconds;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (BIND_ENV, "0.0.0.0:1234"),
            (PROXY_ENV, "http://proxy.local:3128"),
        ]
        .into_iter()
        .collect();

        let mut settings = ConfigFile::default();
        settings.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.server.bind, "0.0.0.0:1234");
        assert_eq!(settings.providers.proxy.as_deref(), Some("http://proxy.local:3128"));
        assert_eq!(settings.bind_addr().unwrap().port(), 1234);
    }

    #[test]
    fn test_duplicate_backend_rejected() {
        let mut settings = ConfigFile::default();
        for _ in 0..2 {
            settings.providers.backends.push(BackendConfig {
                id: "a".into(),
                url: "http://a.local".into(),
            });
        }
        assert!(settings.validate().is_err());
    }
}
