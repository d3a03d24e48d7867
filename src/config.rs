//! Configuration types for the reminder scheduler.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Largest delay a single host timer can express (2^31 - 1 ms, ~24.8 days).
pub const HOST_MAX_DELAY_MS: u64 = 2_147_483_647;

/// Top-level configuration for the reminder scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    /// Maximum single timer delay in milliseconds.
    ///
    /// Reminders further out than this are reached by re-arming the timer
    /// until the remaining delay fits.
    pub max_delay_ms: u64,
    /// Name used in notifications when no pet name is known.
    pub default_pet_name: String,
    /// Diagnostics publishing settings.
    pub diagnostics: DiagnosticsConfig,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            max_delay_ms: HOST_MAX_DELAY_MS,
            default_pet_name: "your pet".to_owned(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

/// Diagnostics sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Whether the host binary starts a diagnostics publisher.
    pub enabled: bool,
    /// Section key the reminder counters are published under.
    pub section: String,
    /// Quiet period used to coalesce bursts of stat changes.
    pub debounce_ms: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            section: "pets".to_owned(),
            debounce_ms: 500,
        }
    }
}

impl ReminderConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::ReminderError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ReminderError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/hearth/reminders.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| std::env::temp_dir().join("hearth-config"))
            .join("hearth")
            .join("reminders.toml")
    }

    /// Maximum single delay clamped to what a host timer can express.
    pub fn effective_max_delay(&self) -> u64 {
        self.max_delay_ms.clamp(1, HOST_MAX_DELAY_MS)
    }
}
