use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Beta key offered when an api requires one
  pub beta_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Base URL of the content server (e.g. "https://content.example.com/v1")
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  pub user_agent: Option<String>,
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
  /// Durable SQLite database
  #[default]
  Sqlite,
  /// Process-lifetime maps; nothing survives exit
  Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub backend: CacheBackend,
  /// Override of the database location (default: $XDG_DATA_HOME/folio/cache.db)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./folio.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/folio/config.yaml
  ///
  /// Without a file, `FOLIO_SERVER_URL` alone is enough to run.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => match std::env::var("FOLIO_SERVER_URL") {
        Ok(url) => Self::for_server(url),
        Err(_) => {
          return Err(eyre!(
            "No configuration file found. Create one at ~/.config/folio/config.yaml\n\
                 or set FOLIO_SERVER_URL."
          ))
        }
      },
    };

    Ok(config.with_env_overrides())
  }

  fn for_server(url: String) -> Self {
    Self {
      server: ServerConfig {
        url,
        timeout_secs: default_timeout_secs(),
        user_agent: None,
      },
      cache: CacheConfig::default(),
      beta_key: None,
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("folio.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("folio").join("config.yaml");
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
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  fn with_env_overrides(mut self) -> Self {
    if let Ok(key) = std::env::var("FOLIO_BETA_KEY") {
      self.beta_key = Some(key);
    }
    self
  }

  /// Get the server access token from the environment, if any.
  ///
  /// Checks FOLIO_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("FOLIO_API_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}
