//! Runtime settings read by the lifecycle manager.
//!
//! The host application owns its settings store; the manager only needs a
//! handful of string values and a licence check, so it sees them through
//! the [`Settings`] trait. [`StaticSettings`] is a map-backed implementation
//! for tests and the CLI.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use glp2_core::{Error, Result};

/// Setting keys understood by the manager.
pub mod keys {
    /// `true`/`false`: whether the tester integration is switched on.
    pub const ENABLED: &str = "glp2Enabled";
    /// Substring matched against the serial port descriptors.
    pub const COM_PATTERN: &str = "glp2ComPattern";
    /// Tester address, 1 to 255.
    pub const COM_ADDRESS: &str = "glp2ComAddress";
    /// Milliseconds to wait after cancelling a test during reset.
    pub const CANCEL_DELAY: &str = "glp2CancelDelay";
    /// Milliseconds between step uploads of a test program.
    pub const PROGRAMMING_DELAY: &str = "glp2ProgrammingDelay";
}

/// Source of runtime settings.
pub trait Settings: Send + Sync {
    /// Current value of `key`, if set.
    fn get(&self, key: &str) -> Option<String>;

    /// Whether the installation is licensed to use the tester.
    fn is_licensed(&self) -> bool {
        true
    }
}

impl<T: Settings + ?Sized> Settings for Arc<T> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn is_licensed(&self) -> bool {
        (**self).is_licensed()
    }
}

/// Settings held in memory.
#[derive(Debug, Clone)]
pub struct StaticSettings {
    values: HashMap<String, String>,
    licensed: bool,
}

impl Default for StaticSettings {
    fn default() -> Self {
        StaticSettings {
            values: HashMap::new(),
            licensed: true,
        }
    }
}

impl StaticSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`.
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    pub fn licensed(mut self, licensed: bool) -> Self {
        self.licensed = licensed;
        self
    }
}

impl Settings for StaticSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn is_licensed(&self) -> bool {
        self.licensed
    }
}

/// Default tester address.
pub const DEFAULT_ADDRESS: u8 = 1;

/// Default wait after cancelling a test during reset.
pub const DEFAULT_CANCEL_DELAY: Duration = Duration::from_millis(500);

/// Typed snapshot of the settings, taken at each connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glp2Settings {
    pub enabled: bool,
    pub com_pattern: String,
    pub address: u8,
    pub cancel_delay: Duration,
    pub programming_delay: Duration,
}

impl Default for Glp2Settings {
    fn default() -> Self {
        Glp2Settings {
            enabled: false,
            com_pattern: String::new(),
            address: DEFAULT_ADDRESS,
            cancel_delay: DEFAULT_CANCEL_DELAY,
            programming_delay: Duration::ZERO,
        }
    }
}

impl Glp2Settings {
    /// Read and validate the settings. Missing keys take their defaults.
    pub fn load(settings: &dyn Settings) -> Result<Self> {
        let defaults = Glp2Settings::default();
        let enabled = match settings.get(keys::ENABLED) {
            Some(value) => crate::params::parse_flag(&value)
                .ok_or_else(|| invalid(keys::ENABLED, &value))?,
            None => defaults.enabled,
        };
        let address = match settings.get(keys::COM_ADDRESS) {
            Some(value) => value
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|a| *a != 0)
                .ok_or_else(|| invalid(keys::COM_ADDRESS, &value))?,
            None => defaults.address,
        };
        Ok(Glp2Settings {
            enabled,
            com_pattern: settings
                .get(keys::COM_PATTERN)
                .map(|p| p.trim().to_string())
                .unwrap_or_default(),
            address,
            cancel_delay: millis(settings, keys::CANCEL_DELAY)?.unwrap_or(defaults.cancel_delay),
            programming_delay: millis(settings, keys::PROGRAMMING_DELAY)?
                .unwrap_or(defaults.programming_delay),
        })
    }
}

fn millis(settings: &dyn Settings, key: &str) -> Result<Option<Duration>> {
    match settings.get(key) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| invalid(key, &value)),
        None => Ok(None),
    }
}

fn invalid(key: &str, value: &str) -> Error {
    Error::InvalidParameters(format!("setting {key} has illegal value {value:?}"))
}
