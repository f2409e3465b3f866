//! Client configuration.
//!
//! A [`Config`] is a flat string→scalar map, deliberately untyped at the
//! edges: the client surface stays identical across brokers while each
//! adapter extracts and validates the keys *it* requires at construction
//! time, failing fast with a message that names the missing key.
//!
//! # Recognized keys
//!
//! | key | effect |
//! |---|---|
//! | `api_key` | Vendor API identifier (always required). |
//! | `api_secret` | Vendor API secret (Zerodha automated login). |
//! | `access_token` | Pre-obtained token; required for manual auth mode. |
//! | `client_id`, `pin`, `totp_secret` | Required for automated auth mode. |
//! | `auth_mode` | `"manual"` or `"auto"`; defaults to the broker's preference. |
//! | `cache_session` | If `true`, sessions persist to `cache/{broker}_session.json`. |
//! | `on_stale` | `"fail"` or `"warn"` - instrument refresh failure policy. |
//!
use std::collections::HashMap;

use secrecy::Secret;

use crate::error::{DalalError, Result};
use crate::models::enums::{AuthMode, OnStale};

/// A scalar configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Str(String),
    Bool(bool),
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Str(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Str(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

/// Broker-agnostic client configuration.
///
/// ```
/// use dalal::config::Config;
///
/// let config = Config::new()
///     .set("api_key", "kite_api_key")
///     .set("access_token", "daily_token")
///     .set("auth_mode", "manual")
///     .set("cache_session", true);
/// assert_eq!(config.get_str("auth_mode"), Some("manual"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: HashMap<String, ConfigValue>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key, builder-style.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Look up a string value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(ConfigValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Look up a boolean value; absent keys read as `false`.
    pub fn get_bool(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(ConfigValue::Bool(true)))
    }

    /// Fetch a required string key, failing with a message that names both
    /// the broker and the key.
    pub fn require_str(&self, broker_id: &str, key: &str) -> Result<String> {
        self.get_str(key).map(str::to_string).ok_or_else(|| {
            DalalError::auth(format!(
                "{} requires '{}' in config for the configured auth mode",
                broker_id, key
            ))
        })
    }

    /// Fetch a required credential wrapped in [`Secret`], keeping it out of
    /// accidental `Debug` output.
    pub fn require_secret(&self, broker_id: &str, key: &str) -> Result<Secret<String>> {
        self.require_str(broker_id, key).map(Secret::new)
    }

    /// Resolve the auth mode, defaulting to the broker's preferred mode.
    pub fn auth_mode(&self, default: AuthMode) -> Result<AuthMode> {
        match self.get_str("auth_mode") {
            Some(raw) => AuthMode::parse(raw),
            None => Ok(default),
        }
    }

    /// Resolve the instrument refresh failure policy (default: fail).
    pub fn on_stale(&self) -> Result<OnStale> {
        match self.get_str("on_stale") {
            Some(raw) => OnStale::parse(raw),
            None => Ok(OnStale::Fail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_str_names_broker_and_key() {
        let config = Config::new();
        let err = config.require_str("zerodha", "api_key").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("zerodha"));
        assert!(msg.contains("api_key"));
    }

    #[test]
    fn auth_mode_defaults_to_broker_preference() {
        let config = Config::new();
        assert_eq!(config.auth_mode(AuthMode::Auto).unwrap(), AuthMode::Auto);

        let config = Config::new().set("auth_mode", "manual");
        assert_eq!(config.auth_mode(AuthMode::Auto).unwrap(), AuthMode::Manual);
    }

    #[test]
    fn on_stale_parses_and_defaults() {
        assert_eq!(Config::new().on_stale().unwrap(), OnStale::Fail);
        let config = Config::new().set("on_stale", "warn");
        assert_eq!(config.on_stale().unwrap(), OnStale::Warn);
        assert!(Config::new().set("on_stale", "panic").on_stale().is_err());
    }

    #[test]
    fn bool_values_default_to_false() {
        let config = Config::new().set("cache_session", true);
        assert!(config.get_bool("cache_session"));
        assert!(!config.get_bool("missing_key"));
    }
}
