//! Costing configuration and the derived-value cache.
//!
//! A handful of knobs drive every cost and margin computation. They are
//! shared behind [`SharedSettings`], which also owns the coarse cache of
//! derived values: any mutation (settings or entities) blows away the
//! `margin:*` and `dashboard:*` keys wholesale.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Settings {
    /// VAT rate as a fraction, `0.2` for 20%.
    pub vat_rate: Decimal,
    /// Default target margin, whole percent.
    pub target_margin: u8,
    /// Whether a price with no explicit flag is taken as VAT-inclusive.
    pub price_includes_vat: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vat_rate: dec!(0.2),
            target_margin: 65,
            price_includes_vat: false,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("vat_rate must be between 0 and 1 (got {0})")]
    VatRate(Decimal),
    #[error("target_margin must be between 0 and 100 (got {0})")]
    TargetMargin(u8),
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.vat_rate < Decimal::ZERO || self.vat_rate > Decimal::ONE {
            return Err(SettingsError::VatRate(self.vat_rate));
        }
        if self.target_margin > 100 {
            return Err(SettingsError::TargetMargin(self.target_margin));
        }
        Ok(())
    }
}

/// Coarse invalidatable cache for derived values keyed by strings like
/// `margin:<slug>` or `dashboard:summary`.
#[derive(Debug, Default)]
pub struct ValueCache {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl ValueCache {
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn put(&self, key: impl Into<String>, value: serde_json::Value) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }

    /// Drop every entry whose key starts with `prefix`.
    pub fn invalidate(&self, prefix: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|k, _| !k.starts_with(prefix));
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Settings plus the cache, shared across services and the watcher.
#[derive(Debug, Default)]
pub struct SharedSettings {
    settings: RwLock<Settings>,
    cache: ValueCache,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: RwLock::new(settings),
            cache: ValueCache::default(),
        }
    }

    pub fn current(&self) -> Settings {
        *self
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the settings and invalidate everything derived from them.
    pub fn update(&self, settings: Settings) -> Result<(), SettingsError> {
        settings.validate()?;
        *self
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner) = settings;
        self.invalidate_derived();
        Ok(())
    }

    pub fn cache(&self) -> &ValueCache {
        &self.cache
    }

    /// Called after any entity mutation.
    pub fn invalidate_derived(&self) {
        self.cache.invalidate("margin:");
        self.cache.invalidate("dashboard:");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn vat_rate_bounds() {
        let s = Settings {
            vat_rate: dec!(1.5),
            ..Default::default()
        };
        assert_eq!(s.validate(), Err(SettingsError::VatRate(dec!(1.5))));
    }

    #[test]
    fn update_invalidates_derived_keys() {
        let shared = SharedSettings::default();
        shared.cache().put("margin:ham-sandwich", json!(42));
        shared.cache().put("dashboard:summary", json!({}));
        shared.cache().put("units:count", json!(7));

        shared
            .update(Settings {
                target_margin: 70,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(shared.cache().get("margin:ham-sandwich"), None);
        assert_eq!(shared.cache().get("dashboard:summary"), None);
        assert_eq!(shared.cache().get("units:count"), Some(json!(7)));
        assert_eq!(shared.current().target_margin, 70);
    }

    #[test]
    fn invalid_update_is_rejected_and_keeps_old_settings() {
        let shared = SharedSettings::default();
        let err = shared.update(Settings {
            target_margin: 120,
            ..Default::default()
        });
        assert!(err.is_err());
        assert_eq!(shared.current().target_margin, 65);
    }
}
