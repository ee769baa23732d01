use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryOptions;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  /// JSON file overriding or extending the bundled fallback datasets
  pub catalog_path: Option<PathBuf>,
  /// Write logs here instead of stderr
  pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_base_url")]
  pub base_url: String,
  /// Per-request deadline; the retry loop does not impose one
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Data type -> endpoint path, merged over the built-in routes
  #[serde(default, deserialize_with = "deserialize_endpoints")]
  pub endpoints: BTreeMap<String, String>,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      timeout_secs: default_timeout_secs(),
      endpoints: BTreeMap::new(),
    }
  }
}

fn default_base_url() -> String {
  "http://localhost:8000".to_string()
}

fn default_timeout_secs() -> u64 {
  10
}

/// Endpoint paths are joined onto the base URL, so force a leading slash.
fn deserialize_endpoints<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let m: BTreeMap<String, String> = BTreeMap::deserialize(deserializer)?;
  Ok(
    m.into_iter()
      .map(|(k, v)| {
        let path = if v.starts_with('/') { v } else { format!("/{}", v) };
        (k, path)
      })
      .collect(),
  )
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_expiry_hours")]
  pub expiry_hours: i64,
  #[serde(default = "default_prefix")]
  pub prefix: String,
  /// Database location (default: $XDG_DATA_HOME/nidata/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      expiry_hours: default_expiry_hours(),
      prefix: default_prefix(),
      path: None,
    }
  }
}

impl CacheConfig {
  pub fn expiry(&self) -> Result<chrono::Duration> {
    if self.expiry_hours < 0 {
      return Err(eyre!("cache.expiry_hours must not be negative"));
    }
    chrono::Duration::try_hours(self.expiry_hours)
      .ok_or_else(|| eyre!("cache.expiry_hours out of range: {}", self.expiry_hours))
  }
}

fn default_true() -> bool {
  true
}

fn default_expiry_hours() -> i64 {
  24
}

fn default_prefix() -> String {
  crate::cache::DEFAULT_PREFIX.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  #[serde(default = "default_retry_delay_ms")]
  pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_retries: default_max_retries(),
      retry_delay_ms: default_retry_delay_ms(),
    }
  }
}

impl RetryConfig {
  pub fn options(&self) -> RetryOptions {
    RetryOptions {
      max_retries: self.max_retries,
      retry_delay: Duration::from_millis(self.retry_delay_ms),
      ..RetryOptions::default()
    }
  }
}

fn default_max_retries() -> u32 {
  2
}

fn default_retry_delay_ms() -> u64 {
  1000
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./nidata.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/nidata/config.yaml
  ///
  /// Without a config file every setting takes its default. `NIDATA_API_URL`
  /// overrides the API base URL either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(url) = std::env::var("NIDATA_API_URL") {
      config.api.base_url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("nidata.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("nidata").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.cache.expiry()?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_document_uses_defaults() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.api.base_url, "http://localhost:8000");
    assert!(config.cache.enabled);
    assert_eq!(config.cache.expiry().unwrap(), chrono::Duration::hours(24));
    assert_eq!(config.retry.options().max_retries, 2);
    assert_eq!(config.retry.options().retry_delay, Duration::from_secs(1));
  }

  #[test]
  fn test_full_document() {
    let config = Config::parse(
      r#"
api:
  base_url: https://integrity.example.org
  timeout_secs: 3
  endpoints:
    alerts: api/alerts/user/42
    mettaStats: /api/ai-metta/stats
cache:
  enabled: false
  expiry_hours: 1
retry:
  max_retries: 5
  retry_delay_ms: 250
catalog_path: ./catalog.json
"#,
    )
    .unwrap();

    assert_eq!(config.api.timeout_secs, 3);
    assert_eq!(config.api.endpoints["alerts"], "/api/alerts/user/42");
    assert_eq!(config.api.endpoints["mettaStats"], "/api/ai-metta/stats");
    assert!(!config.cache.enabled);
    assert_eq!(config.retry.options().retry_delay, Duration::from_millis(250));
    assert_eq!(config.catalog_path, Some(PathBuf::from("./catalog.json")));
  }

  #[test]
  fn test_negative_expiry_rejected() {
    assert!(Config::parse("cache:\n  expiry_hours: -1\n").is_err());
  }

  #[test]
  fn test_out_of_range_expiry_rejected() {
    assert!(Config::parse("cache:\n  expiry_hours: 9999999999999999\n").is_err());

    let cache = CacheConfig {
      expiry_hours: i64::MAX,
      ..CacheConfig::default()
    };
    assert!(cache.expiry().is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/nidata.yaml"))).is_err());
  }
}
