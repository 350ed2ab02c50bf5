//! Configuration
//!
//! Responsible for setting default config, reading configs and setting.
//!
//! The following config items can be set, all values are in milliseconds:
//!  - CommandTimeout: How long a command waits for its reply before giving up. 0 means wait
//!    forever. Defaults to 10000.
//!  - ConnectTimeout: How long to keep trying to attach to a VM that isn't listening yet.
//!    Defaults to 10000.
//!  - ConnectRetryInterval: How long to wait between attach attempts. Defaults to 100.

use std::collections::HashMap;
use std::time::Duration;

use log::warn;

#[derive(Clone, Debug)]
pub struct Config {
    items: HashMap<&'static str, i64>,
}

impl Config {
    /// Create a new config with the default values
    pub fn new() -> Self {
        let mut items = HashMap::new();
        items.insert("CommandTimeout", 10000);
        items.insert("ConnectTimeout", 10000);
        items.insert("ConnectRetryInterval", 100);
        Config { items }
    }

    /// Get a config items value
    pub fn get_config(&self, key: &str) -> Option<i64> {
        self.items.get(key).copied()
    }

    /// Set a config items value to an integer
    ///
    /// Returns false if the item doesn't exist or the value is negative.
    pub fn set_config(&mut self, key: &str, value: i64) -> bool {
        if value < 0 {
            warn!("Can't set config item {} to negative value {}", key, value);
            return false;
        }

        match self.items.get_mut(key) {
            Some(s) => {
                *s = value;
                true
            }
            None => {
                warn!("Couldn't set unfound config item: {}", key);
                false
            }
        }
    }

    /// Parse and apply a `Key=Value` setting
    pub fn apply_setting(&mut self, setting: &str) -> bool {
        let mut parts = setting.splitn(2, '=');
        let key = parts.next().unwrap_or("").trim();
        match parts.next().map(|v| v.trim().parse::<i64>()) {
            Some(Ok(value)) => self.set_config(key, value),
            _ => {
                warn!("Can't understand config setting '{}', expected Key=Value", setting);
                false
            }
        }
    }

    /// Timeout for a single command round trip, `None` when disabled
    pub fn command_timeout(&self) -> Option<Duration> {
        match self.millis("CommandTimeout") {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.millis("ConnectTimeout"))
    }

    pub fn connect_retry_interval(&self) -> Duration {
        Duration::from_millis(self.millis("ConnectRetryInterval"))
    }

    fn millis(&self, key: &str) -> u64 {
        self.get_config(key).unwrap_or(0).max(0) as u64
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}
