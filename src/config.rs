//! Engine config model and persistence helpers.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Top-level configuration stored in `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Auto-save tuning.
    pub autosave: AutosaveCfg,
    /// Upload endpoint settings.
    pub upload: UploadCfg,
}

/// Auto-save tuning values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutosaveCfg {
    /// Quiet window before a burst of changes is persisted.
    pub debounce_ms: u64,
    /// Directory holding the local draft slot.
    pub draft_dir: String,
}

/// Upload endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCfg {
    /// Base URL of the report API.
    pub endpoint: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl EngineConfig {
    /// Load from disk or create defaults when missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let s = fs::read_to_string(path)?;
            Ok(toml::from_str(&s)?)
        } else {
            let cfg = Self::default();
            cfg.save(path)?;
            Ok(cfg)
        }
    }

    /// Persist the config as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let s = toml::to_string_pretty(self)?;
        fs::write(path, s)?;
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            autosave: AutosaveCfg {
                debounce_ms: crate::draft::DEFAULT_DEBOUNCE_MS,
                draft_dir: ".drafts".into(),
            },
            upload: UploadCfg {
                endpoint: "".into(),
                timeout_secs: 30,
            },
        }
    }
}
