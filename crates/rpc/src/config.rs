//! Application configuration
//!
//! One JSON file; every section is optional and falls back to defaults.
//!
//! ```json
//! {
//!   "data_dir": "/var/lib/hearth",
//!   "matcher": { "confidence_threshold": 85 },
//!   "cycle": { "max_workers": 8 }
//! }
//! ```

use anyhow::Context;
use hearth_allocation::WaterfallPolicy;
use hearth_core::Currency;
use hearth_cycle::CycleConfig;
use hearth_recon::MatcherConfig;
use hearth_transfer::TransferConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file when `--config` is absent
pub const CONFIG_ENV: &str = "HEARTH_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HearthConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Currency for statement imports and CLI amounts
    #[serde(default)]
    pub currency: Currency,

    /// Actor id recorded for CLI-initiated actions
    #[serde(default = "default_operator")]
    pub operator: String,

    #[serde(default)]
    pub waterfall: WaterfallPolicy,

    #[serde(default)]
    pub matcher: MatcherConfig,

    #[serde(default)]
    pub transfer: TransferConfig,

    #[serde(default)]
    pub cycle: CycleConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_operator() -> String {
    "cli".to_string()
}

impl Default for HearthConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            currency: Currency::default(),
            operator: default_operator(),
            waterfall: WaterfallPolicy::default(),
            matcher: MatcherConfig::default(),
            transfer: TransferConfig::default(),
            cycle: CycleConfig::default(),
        }
    }
}

impl HearthConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Explicit path first, then `HEARTH_CONFIG`, then defaults
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn write(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), body)
            .with_context(|| format!("writing config {}", path.as_ref().display()))
    }
}
