use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::schema::ResourceSchema;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub paging: Paging,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Upper bound on a single data source call
  #[serde(default)]
  pub request_timeout_ms: Option<u64>,
  #[serde(default)]
  pub log: LogConfig,
  /// Resource schemas keyed by resource name
  #[serde(default, deserialize_with = "deserialize_named_schemas")]
  pub resources: BTreeMap<String, ResourceSchema>,
}

/// Resource names come from the map keys, not from the schema bodies.
fn deserialize_named_schemas<'de, D>(
  deserializer: D,
) -> Result<BTreeMap<String, ResourceSchema>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let mut schemas: BTreeMap<String, ResourceSchema> = BTreeMap::deserialize(deserializer)?;
  for (name, schema) in schemas.iter_mut() {
    schema.name = name.clone();
  }
  Ok(schemas)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Paging {
  #[serde(default = "default_page_size")]
  pub default_page_size: u32,
  #[serde(default = "default_max_page_size")]
  pub max_page_size: u32,
}

fn default_page_size() -> u32 {
  15
}

fn default_max_page_size() -> u32 {
  100
}

impl Default for Paging {
  fn default() -> Self {
    Self {
      default_page_size: default_page_size(),
      max_page_size: default_max_page_size(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
  /// Process-local map
  #[default]
  Memory,
  /// SQLite file, survives restarts
  Sqlite,
  /// Caching disabled; every request hits the data source
  None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub backend: CacheBackendKind,
  #[serde(default = "default_ttl_secs")]
  pub ttl_secs: u64,
  /// Background purge of expired entries; lazy expiry alone is correct
  #[serde(default)]
  pub sweep_interval_secs: Option<u64>,
  /// Defaults to `<data dir>/resq/cache.db`
  #[serde(default)]
  pub sqlite_path: Option<PathBuf>,
}

fn default_ttl_secs() -> u64 {
  60
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      backend: CacheBackendKind::default(),
      ttl_secs: default_ttl_secs(),
      sweep_interval_secs: None,
      sqlite_path: None,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_secs(self.ttl_secs)
  }

  pub fn sweep_interval(&self) -> Option<Duration> {
    self
      .sweep_interval_secs
      .filter(|secs| *secs > 0)
      .map(Duration::from_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// `tracing` filter directive; `RUST_LOG` takes precedence
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Write logs to this file instead of stderr
  #[serde(default)]
  pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./resq.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/resq/config.yaml
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/resq/config.yaml\n\
                 or pass --config <path>."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("resq.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("resq").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  /// Parse and validate a YAML document.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    if self.paging.max_page_size == 0 {
      return Err(eyre!("paging.max_page_size must be positive"));
    }
    if self.paging.default_page_size == 0
      || self.paging.default_page_size > self.paging.max_page_size
    {
      return Err(eyre!(
        "paging.default_page_size must be between 1 and {}",
        self.paging.max_page_size
      ));
    }
    for schema in self.resources.values() {
      schema.validate()?;
    }
    Ok(())
  }

  pub fn request_timeout(&self) -> Option<Duration> {
    self.request_timeout_ms.map(Duration::from_millis)
  }
}
