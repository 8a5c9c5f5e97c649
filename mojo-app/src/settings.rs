//! Persistent render settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};

use mojo_core::{EngineConfig, GainSettings};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BLOCK_SIZE: usize = 512;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub engine: EngineConfig,
    pub gains: GainSettings,
    pub model_path: Option<PathBuf>,
    pub block_size: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            gains: GainSettings::default(),
            model_path: None,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.engine.normalize();
        self.gains.input_gain_db = normalize_gain_db(self.gains.input_gain_db);
        self.gains.output_gain_db = normalize_gain_db(self.gains.output_gain_db);
        self.block_size = self.block_size.clamp(16, 8192);
        // The result ring must hold at least one block or the effect never goes wet.
        self.engine.output_capacity = self.engine.output_capacity.max(self.block_size);
        self.model_path = self
            .model_path
            .take()
            .filter(|p| !p.as_os_str().is_empty());
    }
}

fn normalize_gain_db(db: f32) -> f32 {
    if db.is_finite() {
        db.clamp(mojo_core::audio::MIN_GAIN_DB, mojo_core::audio::MAX_GAIN_DB)
    } else {
        0.0
    }
}

/// Environment overrides, applied after the file is read.
pub fn apply_env_overrides(settings: &mut AppSettings) {
    if let Some(path) = std::env::var_os("MOJO_MODEL_PATH") {
        settings.model_path = Some(PathBuf::from(path));
    }
    if let Some(block) = std::env::var("MOJO_BLOCK_SIZE")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        settings.block_size = block;
    }
    if let Some(ms) = std::env::var("MOJO_WAIT_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        settings.engine.wait_timeout_ms = ms;
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Mojo Insects")
            .join("Mojo")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("mojo")
            .join("settings.json")
    }
}

/// Read settings from `path`, falling back to defaults for a missing or
/// unreadable file.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    apply_env_overrides(&mut settings);
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
