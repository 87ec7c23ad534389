//! Configuration vault – reads/writes `~/.stagehand/config.toml`.

use serde::{Deserialize, Serialize};
use stagehand_runtime::LiveLoopConfig;
use stagehand_types::SensorMode;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persisted operator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL serving every `/api/*` endpoint.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Sensor endpoint passed to `/connect` when none is given.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sensor_endpoint: String,

    #[serde(default)]
    pub sensor_mode: SensorMode,

    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,

    #[serde(default = "default_poll_period_ms")]
    pub gate_poll_period_ms: u64,

    #[serde(default = "default_poll_period_ms")]
    pub timeline_poll_period_ms: u64,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Turns sent with each generation request.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    #[serde(default = "default_exchanges_per_tick")]
    pub exchanges_per_tick: u32,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_tick_period_ms() -> u64 {
    3_000
}
fn default_poll_period_ms() -> u64 {
    1_000
}
fn default_history_capacity() -> usize {
    50
}
fn default_history_window() -> usize {
    10
}
fn default_exchanges_per_tick() -> u32 {
    2
}
fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            sensor_endpoint: String::new(),
            sensor_mode: SensorMode::default(),
            tick_period_ms: default_tick_period_ms(),
            gate_poll_period_ms: default_poll_period_ms(),
            timeline_poll_period_ms: default_poll_period_ms(),
            history_capacity: default_history_capacity(),
            history_window: default_history_window(),
            exchanges_per_tick: default_exchanges_per_tick(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Config {
    pub fn loop_config(&self) -> LiveLoopConfig {
        LiveLoopConfig {
            history_capacity: self.history_capacity.max(1),
            history_window: self.history_window,
            exchanges_per_tick: self.exchanges_per_tick,
        }
    }

    // Zero periods would make `tokio::time::interval` panic.
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms.max(1))
    }

    pub fn gate_poll_period(&self) -> Duration {
        Duration::from_millis(self.gate_poll_period_ms.max(1))
    }

    pub fn timeline_poll_period(&self) -> Duration {
        Duration::from_millis(self.timeline_poll_period_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }
}

/// Return the path to `~/.stagehand/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".stagehand").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
///
/// Environment overrides are not applied here; see [`apply_env_overrides`].
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `STAGEHAND_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `STAGEHAND_BACKEND_URL` | `backend_url` |
/// | `STAGEHAND_SENSOR_ENDPOINT` | `sensor_endpoint` |
/// | `STAGEHAND_SENSOR_MODE` | `sensor_mode` (`robot` / `simulated`) |
/// | `STAGEHAND_TICK_PERIOD_MS` | `tick_period_ms` |
/// | `STAGEHAND_HISTORY_CAPACITY` | `history_capacity` |
///
/// Values that fail to parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("STAGEHAND_BACKEND_URL") {
        cfg.backend_url = v;
    }
    if let Ok(v) = std::env::var("STAGEHAND_SENSOR_ENDPOINT") {
        cfg.sensor_endpoint = v;
    }
    if let Ok(v) = std::env::var("STAGEHAND_SENSOR_MODE")
        && let Ok(mode) = v.parse::<SensorMode>()
    {
        cfg.sensor_mode = mode;
    }
    if let Ok(v) = std::env::var("STAGEHAND_TICK_PERIOD_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.tick_period_ms = ms;
    }
    if let Ok(v) = std::env::var("STAGEHAND_HISTORY_CAPACITY")
        && let Ok(n) = v.parse::<usize>()
    {
        cfg.history_capacity = n;
    }
}

/// Save the config to disk, creating `~/.stagehand/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
