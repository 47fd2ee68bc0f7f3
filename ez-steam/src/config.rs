//! Call manager configuration.
//!
//! Read from a TOML file, e.g.
//!
//! ```toml
//! app_id = 480
//! poll_interval_ms = 200
//! ```
//!
//! `EZ_STEAM_POLL_MS` overrides the polling interval.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::platform::AppId;

/// Spacewar, the platform's public test application.
pub const DEFAULT_APP_ID: u32 = 480;
/// Pause between pumps while calls are outstanding.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

pub const POLL_INTERVAL_ENV: &str = "EZ_STEAM_POLL_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app_id: u32,
    pub poll_interval_ms: u64,
    /// Request the current user's stats at startup so achievement state is
    /// loaded before the first achievement call.
    pub bootstrap_stats: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            bootstrap_stats: true,
        }
    }
}

impl Config {
    pub fn new(app_id: u32) -> Self {
        Self {
            app_id,
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("can't read {}: {e}", path.display())))?;
        Self::from_toml_str(&s)
    }

    /// Apply `EZ_STEAM_POLL_MS` if it is set. Unparseable values are ignored
    /// with a warning.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(raw) = std::env::var(POLL_INTERVAL_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.poll_interval_ms = ms,
                _ => tracing::warn!("ignoring invalid {POLL_INTERVAL_ENV}={raw:?}"),
            }
        }
        self
    }

    pub fn app_id(&self) -> AppId {
        AppId(self.app_id)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".to_string()));
        }
        Ok(())
    }
}
