//! Runtime settings – reads/writes `~/.robokit/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted runtime settings stored in `~/.robokit/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Unit definition document loaded when no path is given on the
    /// command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<PathBuf>,

    /// Pause between stopping all units and shutting them down, giving
    /// in-flight messages time to arrive.
    #[serde(default = "default_shutdown_drain_ms")]
    pub shutdown_drain_ms: u64,

    /// Print the per-unit state table after start and after shutdown.
    #[serde(default = "default_print_status")]
    pub print_status: bool,

    /// Period of the `Tick` sent to every producer while running; `0`
    /// disables ticking.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_shutdown_drain_ms() -> u64 {
    100
}
fn default_print_status() -> bool {
    true
}
fn default_tick_ms() -> u64 {
    1000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            definition: None,
            shutdown_drain_ms: default_shutdown_drain_ms(),
            print_status: default_print_status(),
            tick_ms: default_tick_ms(),
        }
    }
}

/// Return the path to `~/.robokit/config.toml`.
pub fn settings_path() -> PathBuf {
    settings_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn settings_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".robokit").join("config.toml")
}

/// Load the settings, falling back to the defaults when the file does not
/// exist.  Environment overrides apply either way.
pub fn load() -> Result<Settings, String> {
    let mut settings = load_from(&settings_path())?.unwrap_or_default();
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Load the settings from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Settings>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read settings at {}: {}", path.display(), e))?;
    let settings: Settings =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse settings: {}", e))?;
    Ok(Some(settings))
}

/// Apply `ROBOKIT_*` environment variable overrides to `settings`.
///
/// | Variable | Settings field |
/// |---|---|
/// | `ROBOKIT_DEFINITION` | `definition` |
/// | `ROBOKIT_SHUTDOWN_DRAIN_MS` | `shutdown_drain_ms` |
/// | `ROBOKIT_STATUS` | `print_status` (`0`/`false` disables) |
/// | `ROBOKIT_TICK_MS` | `tick_ms` |
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(v) = std::env::var("ROBOKIT_DEFINITION")
        && !v.is_empty()
    {
        settings.definition = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("ROBOKIT_SHUTDOWN_DRAIN_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        settings.shutdown_drain_ms = ms;
    }
    if let Ok(v) = std::env::var("ROBOKIT_TICK_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        settings.tick_ms = ms;
    }
    if let Ok(v) = std::env::var("ROBOKIT_STATUS") {
        settings.print_status = !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "off");
    }
}

/// Save the settings to disk, creating `~/.robokit/` if necessary.
pub fn save(settings: &Settings) -> Result<PathBuf, String> {
    let path = settings_path();
    save_to(settings, &path)?;
    Ok(path)
}

pub(crate) fn save_to(settings: &Settings, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create settings directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write settings at {}: {}", path.display(), e))
}
