// ============================================
// File: crates/veilink-service/src/config.rs
// ============================================
//! # Service Configuration
//!
//! ## Creation Reason
//! Provides configuration management for the Veilink service,
//! supporting TOML files with per-section defaults.
//!
//! ## Configuration Sections
//! - `control`: command socket location, ownership, TCP fallback
//! - `log`: history size and tracing level
//! - `tunnel`: TUN addressing, MTU, routing, flow policy
//! - `shutdown`: hard stop timeout
//!
//! ## Example Configuration
//! ```toml
//! [control]
//! base_path = "/var/run/veilink"
//! owner = "veilink"
//!
//! [log]
//! max_lines = 300
//! level = "info"
//!
//! [tunnel]
//! inet4_address = ["172.19.0.1/30"]
//! mtu = 9000
//! auto_route = true
//!
//! [shutdown]
//! timeout_secs = 10
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All config changes require service restart
//! - `tunnel.packet_address` is a policy point for UDP flows; it stays
//!   off unless a deployment explicitly needs inline peer addressing

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use veilink_platform::options::TunOptions;

use crate::error::{Result, ServiceError};

// ============================================
// ServiceConfig
// ============================================

/// Main service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Command socket configuration.
    #[serde(default)]
    pub control: ControlConfig,

    /// Log history configuration.
    #[serde(default)]
    pub log: LogConfig,

    /// Tunnel configuration.
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// Shutdown fail-safe configuration.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl ServiceConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or
    /// validated.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ServiceError::config_load(&path_str, e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ServiceError::config_load(&path_str, e.to_string()))?;

        config.validate()?;
        info!("configuration loaded from {}", path_str);
        Ok(config)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    /// Returns an error on parse or validation failure.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ServiceError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    ///
    /// # Errors
    /// Returns the first validation failure.
    pub fn validate(&self) -> Result<()> {
        self.log.validate()?;
        self.tunnel.validate()?;
        self.shutdown.validate()?;
        Ok(())
    }
}

// ============================================
// ControlConfig
// ============================================

fn default_base_path() -> PathBuf {
    PathBuf::from("/var/run/veilink")
}

fn default_socket_name() -> String {
    "command.sock".to_owned()
}

fn default_tcp_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9008)
}

/// Command socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Base directory holding the command socket.
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    /// Socket file name inside `base_path`.
    #[serde(default = "default_socket_name")]
    pub socket_name: String,

    /// Unprivileged user the socket is chowned to, if set.
    #[serde(default)]
    pub owner: Option<String>,

    /// Group the socket is chowned to, if set.
    #[serde(default)]
    pub group: Option<String>,

    /// Listen on loopback TCP instead of a unix socket.
    #[serde(default)]
    pub use_tcp: bool,

    /// Loopback address for TCP mode.
    #[serde(default = "default_tcp_listen")]
    pub tcp_listen: SocketAddr,
}

impl ControlConfig {
    /// Returns the full command socket path.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.base_path.join(&self.socket_name)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            socket_name: default_socket_name(),
            owner: None,
            group: None,
            use_tcp: false,
            tcp_listen: default_tcp_listen(),
        }
    }
}

// ============================================
// LogConfig
// ============================================

fn default_max_lines() -> usize {
    300
}

fn default_level() -> String {
    "info".to_owned()
}

/// Log history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Bounded history capacity; oldest records evicted on overflow.
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,

    /// Tracing level filter for the process.
    #[serde(default = "default_level")]
    pub level: String,
}

impl LogConfig {
    fn validate(&self) -> Result<()> {
        if self.max_lines == 0 {
            return Err(ServiceError::config_invalid(
                "log.max_lines",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
            level: default_level(),
        }
    }
}

// ============================================
// TunnelConfig
// ============================================

fn default_udp_timeout_secs() -> u64 {
    60
}

/// Tunnel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// TUN addressing and routing options.
    #[serde(flatten)]
    pub options: TunOptions,

    /// Idle timeout for UDP associations.
    #[serde(default = "default_udp_timeout_secs")]
    pub udp_timeout_secs: u64,

    /// Encode the per-packet peer address inline in UDP payloads.
    ///
    /// Policy point: destinations that multiplex one association across
    /// peers need it; everything else does not. Default off.
    #[serde(default)]
    pub packet_address: bool,
}

impl TunnelConfig {
    /// Returns the session-immutable TUN options.
    #[must_use]
    pub fn tun_options(&self) -> TunOptions {
        self.options.clone()
    }

    /// Returns the UDP association idle timeout.
    #[must_use]
    pub const fn udp_timeout(&self) -> Duration {
        Duration::from_secs(self.udp_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        self.options
            .validate()
            .map_err(|e| ServiceError::config_invalid("tunnel", e.to_string()))?;
        if self.udp_timeout_secs == 0 {
            return Err(ServiceError::config_invalid(
                "tunnel.udp_timeout_secs",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            options: TunOptions::default(),
            udp_timeout_secs: default_udp_timeout_secs(),
            packet_address: false,
        }
    }
}

// ============================================
// ShutdownConfig
// ============================================

fn default_shutdown_timeout_secs() -> u64 {
    10
}

/// Shutdown fail-safe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Hard timeout; the process terminates unconditionally once it
    /// elapses during shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    /// Returns the shutdown timeout as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(ServiceError::config_invalid(
                "shutdown.timeout_secs",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use veilink_platform::options::IpPrefix;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.control.socket_path(),
            PathBuf::from("/var/run/veilink/command.sock")
        );
        assert_eq!(config.log.max_lines, 300);
        assert_eq!(config.shutdown.timeout(), Duration::from_secs(10));
        assert!(!config.tunnel.packet_address);
        assert!(config.tunnel.options.auto_route);
    }

    #[test]
    fn test_parse_full_config() {
        let config = ServiceConfig::parse(
            r#"
            [control]
            base_path = "/tmp/veilink"
            owner = "veilink"
            use_tcp = true
            tcp_listen = "127.0.0.1:9900"

            [log]
            max_lines = 50
            level = "debug"

            [tunnel]
            inet4_address = ["10.99.0.1/30"]
            inet6_address = []
            dns_servers = ["9.9.9.9"]
            mtu = 1500
            auto_route = true
            exclude_routes = ["192.168.0.0/16"]
            udp_timeout_secs = 30
            packet_address = true

            [shutdown]
            timeout_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.control.owner.as_deref(), Some("veilink"));
        assert!(config.control.use_tcp);
        assert_eq!(config.log.max_lines, 50);
        assert_eq!(config.tunnel.options.mtu, 1500);
        assert_eq!(config.tunnel.options.exclude_routes.len(), 1);
        assert!(config.tunnel.packet_address);
        assert_eq!(config.shutdown.timeout_secs, 5);

        let prefix: IpPrefix = "10.99.0.1/30".parse().unwrap();
        assert_eq!(config.tunnel.options.inet4_address, vec![prefix]);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ServiceConfig::parse("[log]\nmax_lines = 0").is_err());
        assert!(ServiceConfig::parse("[tunnel]\nmtu = 100").is_err());
        assert!(ServiceConfig::parse("[shutdown]\ntimeout_secs = 0").is_err());
        assert!(ServiceConfig::parse("[tunnel]\ninet4_address = [\"bad\"]").is_err());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ServiceConfig::parse("").unwrap();
        assert_eq!(config.log.max_lines, 300);
    }
}
