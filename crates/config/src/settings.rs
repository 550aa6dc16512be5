// Application settings
// Loaded from ~/.config/kpisim/settings.json

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Quiet period before an automatic recalculation, in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 3500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Recalculation
    #[serde(rename = "recalc.debounceMs")]
    pub debounce_ms: u64,

    #[serde(rename = "recalc.automatic")]
    pub auto_recalc: bool,

    // Logging: error, warn, info, debug, trace
    #[serde(rename = "log.level")]
    pub log_level: String,

    // CLI
    #[serde(rename = "cli.defaultGame")]
    pub default_game: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            auto_recalc: true,
            log_level: "warn".to_string(),
            default_game: None,
        }
    }
}

#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "settings IO error: {e}"),
            Self::Parse(e) => write!(f, "settings parse error: {e}"),
        }
    }
}

impl std::error::Error for SettingsError {}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kpisim");
        config_dir.join("settings.json")
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Load settings from the default path, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Error loading {}: {}", path.display(), e);
                eprintln!("Using default settings");
                Self::default()
            }
        }
    }

    /// Load settings from `path`. A missing file yields defaults.
    ///
    /// Lines starting with `//` are treated as comments.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(SettingsError::Io(e)),
        };

        let cleaned: String = contents
            .lines()
            .filter(|line| !line.trim().starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");

        serde_json::from_str(&cleaned).map_err(SettingsError::Parse)
    }

    /// Save current settings to the default path
    pub fn save(&self) -> Result<(), SettingsError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(SettingsError::Io)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(SettingsError::Parse)?;
        fs::write(path, json).map_err(SettingsError::Io)
    }

    /// Get the config file path for display
    pub fn config_path_display() -> String {
        Self::config_path().to_string_lossy().to_string()
    }
}
