//! Bridge configuration.

use crate::environment::{self, LibArchitecture};
use crate::error::{BridgeError, Result};
use crate::realtime::PRIORITY_SYNC_INTERVAL;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Roughly 60 windowing event passes per second.
pub const EVENT_LOOP_INTERVAL: Duration = Duration::from_millis(1000 / 60);

/// Settings for the native side, which launches or contacts hosts.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// How long to wait for a host to connect and report back before giving
    /// up on the plugin.
    pub handshake_timeout: Duration,
    pub priority_sync_interval: Duration,
    pub host_binary: PathBuf,
    pub host_binary_32: PathBuf,
    pub group_host_binary: PathBuf,
    pub group_host_binary_32: PathBuf,
    pub wine_loader: PathBuf,
    /// Directory for group sockets and per-plugin endpoint directories.
    pub temp_dir: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            priority_sync_interval: PRIORITY_SYNC_INTERVAL,
            host_binary: PathBuf::from("yabridge-host.exe"),
            host_binary_32: PathBuf::from("yabridge-host-32.exe"),
            group_host_binary: PathBuf::from("yabridge-group.exe"),
            group_host_binary_32: PathBuf::from("yabridge-group-32.exe"),
            wine_loader: environment::wine_loader(),
            temp_dir: environment::temporary_directory(),
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.handshake_timeout.is_zero() {
            return Err(BridgeError::InvalidConfig(
                "handshake_timeout must be greater than zero".to_string(),
            ));
        }
        if self.priority_sync_interval.is_zero() {
            return Err(BridgeError::InvalidConfig(
                "priority_sync_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn host_binary_for(&self, architecture: LibArchitecture) -> &Path {
        match architecture {
            LibArchitecture::Dll32 => &self.host_binary_32,
            LibArchitecture::Dll64 => &self.host_binary,
        }
    }

    pub fn group_host_binary_for(&self, architecture: LibArchitecture) -> &Path {
        match architecture {
            LibArchitecture::Dll32 => &self.group_host_binary_32,
            LibArchitecture::Dll64 => &self.group_host_binary,
        }
    }
}

/// Settings for the Wine-side host process.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// How long a bridge keeps retrying the plugin's control socket.
    pub connect_timeout: Duration,
    pub event_interval: Duration,
    /// Upper bound of native windowing messages handled per event pass.
    pub max_windowing_messages: usize,
    /// Grace window before an idle group host shuts down.
    pub shutdown_delay: Duration,
    /// Route the process's own STDOUT and STDERR through the logger.
    pub capture_stdio: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            event_interval: EVENT_LOOP_INTERVAL,
            max_windowing_messages: 20,
            shutdown_delay: Duration::from_secs(2),
            capture_stdio: true,
        }
    }
}

impl HostConfig {
    pub fn validate(&self) -> Result<()> {
        if self.event_interval.is_zero() {
            return Err(BridgeError::InvalidConfig(
                "event_interval must be greater than zero".to_string(),
            ));
        }
        if self.max_windowing_messages == 0 {
            return Err(BridgeError::InvalidConfig(
                "max_windowing_messages must allow at least one message".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolved per-plugin settings. Parsing them from disk is left to the
/// caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    /// Host the plugin in the named group instead of its own process.
    pub group: Option<String>,
}

impl Configuration {
    pub fn grouped(name: impl Into<String>) -> Self {
        Self {
            group: Some(name.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.priority_sync_interval, Duration::from_secs(10));
        assert!(config.validate().is_ok());

        let host = HostConfig::default();
        assert_eq!(host.shutdown_delay, Duration::from_secs(2));
        assert_eq!(host.max_windowing_messages, 20);
        assert!(host.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let config = BridgeConfig {
            handshake_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(BridgeError::InvalidConfig(_))));

        let host = HostConfig {
            max_windowing_messages: 0,
            ..Default::default()
        };
        assert!(host.validate().is_err());
    }

    #[test]
    fn test_host_binary_by_architecture() {
        let config = BridgeConfig::default();
        assert_eq!(
            config.host_binary_for(LibArchitecture::Dll32),
            Path::new("yabridge-host-32.exe")
        );
        assert_eq!(
            config.group_host_binary_for(LibArchitecture::Dll64),
            Path::new("yabridge-group.exe")
        );
    }
}
