//! Synchronization settings of the commit engine
//!
//! Timeouts and retry counts are tunables rather than protocol constants.

use std::path::Path;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment prefix for overrides, e.g. `PVE_NETWORK_IPDB_SYNC_TIMEOUT_MS`
pub const ENV_PREFIX: &str = "PVE_NETWORK_IPDB";

/// Timeouts and retry policy used while committing transactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Bound for every convergence wait and watchdog
    pub sync_timeout_ms: u64,
    /// Settle interval after a successful commit
    pub commit_barrier_ms: u64,
    /// Rounds of add-then-verify when reconciling addresses
    pub address_rounds: u32,
    /// Attempts of an address dump answered with EBUSY
    pub read_retries: u32,
    /// Pause between busy address dumps
    pub busy_backoff_ms: u64,
    /// Attempts of the post-commit reload
    pub reload_attempts: u32,
    pub reload_interval_ms: u64,
    /// Poll interval while an interface leaves the namespace
    pub netns_poll_ms: u64,
    /// Bound of the bond address re-add workaround
    pub bond_readd_attempts: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sync_timeout_ms: 5000,
            commit_barrier_ms: 200,
            address_rounds: 3,
            read_retries: 3,
            busy_backoff_ms: 500,
            reload_attempts: 3,
            reload_interval_ms: 1000,
            netns_poll_ms: 100,
            bond_readd_attempts: 10,
        }
    }
}

impl SyncSettings {
    /// Load settings from file, with environment overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()?;

        let settings: SyncSettings = settings.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the standard locations, falling back to defaults
    pub fn load_with_defaults() -> Result<Self, ConfigError> {
        let config_paths = ["/etc/pve/network-ipdb.conf", "./network-ipdb.conf"];

        for path in config_paths {
            if Path::new(path).exists() {
                match Self::load_from_file(path) {
                    Ok(settings) => return Ok(settings),
                    Err(e) => warn!("Failed to load settings from {}: {}", path, e),
                }
            }
        }

        let settings: SyncSettings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.address_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "address_rounds".to_string(),
                value: "0".to_string(),
            });
        }
        if self.read_retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "read_retries".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn commit_barrier(&self) -> Duration {
        Duration::from_millis(self.commit_barrier_ms)
    }

    pub fn busy_backoff(&self) -> Duration {
        Duration::from_millis(self.busy_backoff_ms)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_millis(self.reload_interval_ms)
    }

    pub fn netns_poll(&self) -> Duration {
        Duration::from_millis(self.netns_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = SyncSettings::default();
        assert_eq!(settings.sync_timeout(), Duration::from_secs(5));
        assert_eq!(settings.address_rounds, 3);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "sync_timeout_ms = 250\naddress_rounds = 5").unwrap();

        let settings = SyncSettings::load_from_file(file.path()).unwrap();
        assert_eq!(settings.sync_timeout_ms, 250);
        assert_eq!(settings.address_rounds, 5);
        // untouched keys keep their defaults
        assert_eq!(settings.read_retries, 3);
    }

    #[test]
    fn test_reject_zero_rounds() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "address_rounds = 0").unwrap();

        assert!(SyncSettings::load_from_file(file.path()).is_err());
    }
}
