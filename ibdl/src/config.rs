// ibdl/src/config.rs
// Connection and request configuration. Precedence when loading:
// environment variable > config file > built-in default.

use crate::base::IbdlError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 7497; // paper-trading port; 7496 for live

/// Error codes that mark the whole session not-ready when received, as
/// opposed to request-local errors. Venue-specific, so overridable in config.
pub const DEFAULT_FATAL_ERROR_CODES: [i32; 8] = [502, 504, 1100, 1101, 1102, 1300, 2109, 2110];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  // Connection settings
  pub host: String,
  pub port: u16,
  pub client_id: i32,

  // Timeout settings (seconds)
  pub connection_timeout: u64,
  pub data_timeout: u64,

  /// Delay between batch requests, in seconds.
  pub request_delay: f64,

  // Default request parameters
  pub default_duration: String,
  pub default_bar_size: String,
  pub default_what_to_show: String,
  pub default_use_rth: bool,

  /// Error codes that flip the session to not-ready.
  pub fatal_error_codes: Vec<i32>,
}

impl Default for Config {
  fn default() -> Self {
    Config {
      host: DEFAULT_HOST.to_string(),
      port: DEFAULT_PORT,
      client_id: 1,
      connection_timeout: 30,
      data_timeout: 60,
      request_delay: 1.0,
      default_duration: "1 Y".to_string(),
      default_bar_size: "1 day".to_string(),
      default_what_to_show: "TRADES".to_string(),
      default_use_rth: true,
      fatal_error_codes: DEFAULT_FATAL_ERROR_CODES.to_vec(),
    }
  }
}

fn env_var(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, IbdlError> {
  raw.parse().map_err(|_| {
    IbdlError::ConfigurationError(format!("Invalid value for {}: '{}'", name, raw))
  })
}

impl Config {
  /// Overlays any set `IBKR_*` environment variables onto this config.
  pub fn apply_env(mut self) -> Result<Self, IbdlError> {
    if let Some(v) = env_var("IBKR_HOST") {
      self.host = v;
    }
    if let Some(v) = env_var("IBKR_PORT") {
      self.port = parse_env("IBKR_PORT", &v)?;
    }
    if let Some(v) = env_var("IBKR_CLIENT_ID") {
      self.client_id = parse_env("IBKR_CLIENT_ID", &v)?;
    }
    if let Some(v) = env_var("IBKR_CONNECTION_TIMEOUT") {
      self.connection_timeout = parse_env("IBKR_CONNECTION_TIMEOUT", &v)?;
    }
    if let Some(v) = env_var("IBKR_DATA_TIMEOUT") {
      self.data_timeout = parse_env("IBKR_DATA_TIMEOUT", &v)?;
    }
    if let Some(v) = env_var("IBKR_REQUEST_DELAY") {
      self.request_delay = parse_env("IBKR_REQUEST_DELAY", &v)?;
    }
    if let Some(v) = env_var("IBKR_DEFAULT_DURATION") {
      self.default_duration = v;
    }
    if let Some(v) = env_var("IBKR_DEFAULT_BAR_SIZE") {
      self.default_bar_size = v;
    }
    if let Some(v) = env_var("IBKR_DEFAULT_WHAT_TO_SHOW") {
      self.default_what_to_show = v;
    }
    if let Some(v) = env_var("IBKR_DEFAULT_USE_RTH") {
      self.default_use_rth = v.to_lowercase() == "true";
    }
    Ok(self)
  }

  /// Loads configuration from a JSON file. A missing file yields defaults.
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, IbdlError> {
    let path = path.as_ref();
    if !path.exists() {
      debug!("Config file {:?} not found, using defaults", path);
      return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| {
      IbdlError::ConfigurationError(format!("Invalid JSON in config file {:?}: {}", path, e))
    })
  }

  pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), IbdlError> {
    let contents = serde_json::to_string_pretty(self)
      .map_err(|e| IbdlError::ConfigurationError(e.to_string()))?;
    std::fs::write(path, contents)?;
    Ok(())
  }

  /// Full-precedence load: built-in defaults, then the config file named by
  /// `IBKR_CONFIG_FILE` (default `config.json`), then environment variables.
  pub fn load() -> Result<Self, IbdlError> {
    let config_file = env_var("IBKR_CONFIG_FILE").unwrap_or_else(|| "config.json".to_string());
    Config::from_file(config_file)?.apply_env()
  }

  pub fn connection_timeout(&self) -> Duration {
    Duration::from_secs(self.connection_timeout)
  }

  pub fn data_timeout(&self) -> Duration {
    Duration::from_secs(self.data_timeout)
  }

  pub fn request_delay(&self) -> Duration {
    Duration::from_secs_f64(self.request_delay.max(0.0))
  }

  // Preset configurations for the usual venue ports.

  pub fn demo() -> Self {
    Config { port: 7497, ..Config::default() }
  }

  pub fn live() -> Self {
    Config { port: 7496, ..Config::default() }
  }

  pub fn gateway_demo() -> Self {
    Config { port: 4002, ..Config::default() }
  }

  pub fn gateway_live() -> Self {
    Config { port: 4001, ..Config::default() }
  }
}
