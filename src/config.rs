use anyhow::{Context as _, Result};
use camino::{Utf8Path, Utf8PathBuf};
use margin_core::Settings;
use margin_fs::StorageMode;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{GlobalArgs, APP_NAME, MARGIN_DIR};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// VAT rate as a fraction of one.
    pub vat: Decimal,
    /// Default target margin, whole percent.
    pub margin_target: u8,
    /// Whether prices without an explicit flag are VAT-inclusive.
    pub default_price_includes_vat: bool,
    pub storage_mode: StorageMode,
    /// Directory depth when discovering entity files.
    pub max_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vat: dec!(0.2),
            margin_target: 65,
            default_price_includes_vat: false,
            storage_mode: StorageMode::Filesystem,
            max_depth: 10,
        }
    }
}

pub const CONFIG_NAME: &str = "config.toml";

pub fn config_file_path(base_path: &Utf8Path) -> Utf8PathBuf {
    base_path.join(MARGIN_DIR).join(CONFIG_NAME)
}

/// Global fallback config location, for running outside a collection.
pub fn global_config_path() -> Option<Utf8PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", APP_NAME)?;
    Utf8PathBuf::from_path_buf(dirs.config_dir().join(CONFIG_NAME)).ok()
}

impl Config {
    pub fn read(path: &Utf8Path) -> Result<Self> {
        let path = if path.is_file() {
            path.to_path_buf()
        } else if let Some(global) = global_config_path().filter(|p| p.is_file()) {
            global
        } else {
            debug!("no configuration file, using defaults");
            return Ok(Self::default());
        };

        debug!("loading configuration from {path}");
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read configuration: '{path}'"))?;
        toml::from_str(&text).with_context(|| format!("invalid configuration: '{path}'"))
    }

    pub fn write(&self, path: &Utf8Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text).with_context(|| format!("cannot write '{path}'"))?;
        Ok(())
    }

    pub fn override_with_args(&mut self, args: &GlobalArgs) {
        if let Some(mode) = args.storage_mode {
            self.storage_mode = mode;
        }
        if let Some(vat) = args.vat {
            self.vat = vat;
        }
        if let Some(target) = args.margin_target {
            self.margin_target = target;
        }
    }

    /// The engine-facing slice of the configuration.
    pub fn settings(&self) -> Settings {
        Settings {
            vat_rate: self.vat,
            target_margin: self.margin_target,
            price_includes_vat: self.default_price_includes_vat,
        }
    }
}
