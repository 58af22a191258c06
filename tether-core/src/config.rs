//! Runtime Configuration
//!
//! Configuration is thread-confined, like the rest of the reactive state. Each
//! thread starts from [`Config::default`] and may install its own settings,
//! typically decoded from JSON:
//!
//! ```rust,ignore
//! let config = Config::from_json(r#"{ "sync": true }"#)?;
//! tether_core::config::set(config);
//! ```

use std::cell::RefCell;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default number of times a single watcher may run within one flush before
/// the flush is aborted as an infinite update loop.
pub const DEFAULT_MAX_UPDATE_COUNT: usize = 100;

/// Settings for the reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Suppress warning logs. Warn hooks still fire.
    pub silent: bool,

    /// Run non-lazy watchers synchronously on notification instead of
    /// queueing them for the next flush.
    pub sync: bool,

    /// Per-flush run limit for a single watcher.
    pub max_update_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            silent: false,
            sync: false,
            max_update_count: DEFAULT_MAX_UPDATE_COUNT,
        }
    }
}

impl Config {
    /// Decode a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

thread_local! {
    static CONFIG: RefCell<Config> = RefCell::new(Config::default());
}

/// The configuration active on the current thread.
pub fn get() -> Config {
    CONFIG.with(|config| config.borrow().clone())
}

/// Replace the configuration for the current thread.
pub fn set(config: Config) {
    CONFIG.with(|current| *current.borrow_mut() = config);
}

/// Modify the configuration for the current thread in place.
pub fn update<F>(f: F)
where
    F: FnOnce(&mut Config),
{
    CONFIG.with(|config| f(&mut config.borrow_mut()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(!config.silent);
        assert!(!config.sync);
        assert_eq!(config.max_update_count, 100);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = Config::from_json(r#"{ "sync": true }"#).unwrap();
        assert!(config.sync);
        assert!(!config.silent);
        assert_eq!(config.max_update_count, DEFAULT_MAX_UPDATE_COUNT);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(Config::from_json("{ sync: yes").is_err());
    }

    #[test]
    fn set_and_update_are_thread_local() {
        update(|c| c.max_update_count = 7);
        assert_eq!(get().max_update_count, 7);

        let other = std::thread::spawn(|| get().max_update_count)
            .join()
            .unwrap();
        assert_eq!(other, DEFAULT_MAX_UPDATE_COUNT);

        set(Config::default());
        assert_eq!(get().max_update_count, DEFAULT_MAX_UPDATE_COUNT);
    }
}
