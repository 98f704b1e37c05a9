use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the engine intercepts for, e.g. "https://app.example.com"
  pub origin: String,
  #[serde(default)]
  pub routes: RouteConfig,
  pub precache: PrecacheConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  /// Override for the engine's data directory (databases, logs)
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
  /// URL suffixes classified as static assets (cache-first)
  #[serde(default = "default_static_suffixes")]
  pub static_suffixes: Vec<String>,
  /// Path prefixes classified as API calls (network-first)
  #[serde(default = "default_api_prefixes")]
  pub api_prefixes: Vec<String>,
}

impl Default for RouteConfig {
  fn default() -> Self {
    Self {
      static_suffixes: default_static_suffixes(),
      api_prefixes: default_api_prefixes(),
    }
  }
}

fn default_static_suffixes() -> Vec<String> {
  [".css", ".js", ".png", ".svg", ".ico", ".woff2", ".webmanifest"]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_api_prefixes() -> Vec<String> {
  vec!["/api/".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrecacheConfig {
  /// Versioned generation name, e.g. "shell-v3". Bumping it triggers a
  /// fresh install and cutover on next boot.
  pub generation: String,
  /// Paths fetched and stored atomically at install
  #[serde(default = "default_precache_paths")]
  pub paths: Vec<String>,
  /// Page served for navigations when offline with no cached copy
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
}

fn default_precache_paths() -> Vec<String> {
  vec![
    "/".to_string(),
    "/offline.html".to_string(),
    "/manifest.webmanifest".to_string(),
  ]
}

fn default_offline_page() -> String {
  "/offline.html".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  /// Bounded wait per network attempt before the engine falls back,
  /// in milliseconds
  #[serde(default = "default_deadline_ms")]
  pub deadline_ms: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      deadline_ms: default_deadline_ms(),
    }
  }
}

fn default_deadline_ms() -> u64 {
  10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Period of the drain wake-up tag, in seconds
  #[serde(default = "default_wake_interval_secs")]
  pub wake_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      wake_interval_secs: default_wake_interval_secs(),
    }
  }
}

fn default_wake_interval_secs() -> u64 {
  60
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./stashd.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/stashd/config.yaml
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
        "No configuration file found. Create one at ~/.config/stashd/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("stashd.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("stashd").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// The configured origin as a parsed URL.
  pub fn origin(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))
  }

  /// Precache manifest, guaranteed to include the offline page.
  pub fn manifest_paths(&self) -> Vec<String> {
    let mut paths = self.precache.paths.clone();
    if !paths.contains(&self.precache.offline_page) {
      paths.push(self.precache.offline_page.clone());
    }
    paths
  }

  /// Resolve the data directory: flag override, then config, then
  /// the platform data dir.
  pub fn resolve_data_dir(&self, override_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = override_dir {
      return Ok(dir.to_path_buf());
    }
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("stashd"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_minimal_config() {
    let config: Config = serde_yaml::from_str(
      r#"
origin: "https://app.example.com"
precache:
  generation: "shell-v1"
"#,
    )
    .unwrap();

    assert_eq!(config.origin().unwrap().as_str(), "https://app.example.com/");
    assert_eq!(config.network.deadline_ms, 10_000);
    assert_eq!(config.sync.wake_interval_secs, 60);
    assert!(config.routes.api_prefixes.contains(&"/api/".to_string()));
  }

  #[test]
  fn test_manifest_always_includes_offline_page() {
    let config: Config = serde_yaml::from_str(
      r#"
origin: "https://app.example.com"
precache:
  generation: "shell-v1"
  paths: ["/"]
  offline_page: "/offline.html"
"#,
    )
    .unwrap();

    let paths = config.manifest_paths();
    assert!(paths.contains(&"/".to_string()));
    assert!(paths.contains(&"/offline.html".to_string()));
  }
}
