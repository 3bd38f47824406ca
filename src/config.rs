use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Version tag baked in at build time. Bump it to invalidate every cache of the previous deployment.
pub const VERSION_TAG: &str = match option_env!("STOWAWAY_VERSION_TAG") {
  Some(tag) => tag,
  None => "v1",
};

/// Prefix shared by every store this build creates.
pub const STORE_PREFIX: &str = "stowaway";

/// Resources pre-cached on install, relative to the base path.
pub const STATIC_MANIFEST: &[&str] = &["./", "./index.html"];

/// Requests whose path contains this are server-authoritative (network-first).
pub const API_PATH_PATTERN: &str = "/api/";

/// Writes whose path contains this are progress updates eligible for deferred sync.
pub const PROGRESS_PATH_PATTERN: &str = "/api/progress";

/// Background sync tag that triggers a replay of the deferred queue.
pub const SYNC_TAG: &str = "sync-progress";

/// Names of the stores recognized by this build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNames {
  /// Dynamic responses, manifest entries and deferred writes
  pub current: String,
  /// Static assets fetched on demand
  pub assets: String,
}

impl StoreNames {
  pub fn for_version(prefix: &str, tag: &str) -> Self {
    Self {
      current: format!("{}-{}", prefix, tag),
      assets: format!("{}-assets-{}", prefix, tag),
    }
  }

  pub fn is_recognized(&self, name: &str) -> bool {
    name == self.current || name == self.assets
  }
}

/// Caching policy fixed at build time.
#[derive(Debug, Clone)]
pub struct OfflinePolicy {
  pub stores: StoreNames,
  pub manifest: Vec<String>,
  pub api_pattern: String,
  pub progress_pattern: String,
  pub sync_tag: String,
}

impl Default for OfflinePolicy {
  fn default() -> Self {
    Self {
      stores: StoreNames::for_version(STORE_PREFIX, VERSION_TAG),
      manifest: STATIC_MANIFEST.iter().map(|s| s.to_string()).collect(),
      api_pattern: API_PATH_PATTERN.to_string(),
      progress_pattern: PROGRESS_PATH_PATTERN.to_string(),
      sync_tag: SYNC_TAG.to_string(),
    }
  }
}

/// Host configuration loaded from YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin that manifest entries and relative fetch targets resolve against
  #[serde(default = "default_origin")]
  pub origin: Url,
  /// Path the application is served under (e.g. "/app/")
  #[serde(default = "default_base_path")]
  pub base_path: String,
  /// Cache database location (default: $XDG_DATA_HOME/stowaway/cache.db)
  pub database: Option<PathBuf>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub log: LogConfig,
}

fn default_origin() -> Url {
  Url::parse("http://localhost:8080/").expect("static origin is a valid URL")
}

fn default_base_path() -> String {
  "/".to_string()
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      base_path: default_base_path(),
      database: None,
      cache: CacheConfig::default(),
      network: NetworkConfig::default(),
      log: LogConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// When false, every store operation is a no-op
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Request headers that take part in the request identity (case-insensitive)
  #[serde(default, deserialize_with = "deserialize_lowercase_vec")]
  pub key_headers: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      key_headers: Vec::new(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn deserialize_lowercase_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Default filter directive; RUST_LOG takes precedence
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      file: None,
    }
  }
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./stowaway.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/stowaway/config.yaml
  ///
  /// Falls back to defaults when no file is found.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("stowaway.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("stowaway").join("config.yaml");
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

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Resolve a fetch target: absolute URLs pass through, anything else joins onto the origin.
  pub fn resolve_target(&self, target: &str) -> Result<Url> {
    match Url::parse(target) {
      Ok(url) => Ok(url),
      Err(url::ParseError::RelativeUrlWithoutBase) => self
        .origin
        .join(target)
        .map_err(|e| eyre!("Invalid target {}: {}", target, e)),
      Err(e) => Err(eyre!("Invalid target {}: {}", target, e)),
    }
  }
}
