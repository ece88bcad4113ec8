// ============================================
// File: crates/veilink-platform/src/tun/linux.rs
// ============================================
//! # Linux Host Platform Adapter
//!
//! ## Creation Reason
//! Desktop Linux implementation of the [`Platform`] capability
//! interface. Mobile hosts supply their own adapters over the extension
//! APIs; this one talks to `/dev/net/tun` and `/proc` directly so the
//! service can run on a plain Linux machine.
//!
//! ## Main Functionality
//! - TUN descriptor creation via `TUNSETIFF` ioctl
//! - Address/MTU/route configuration through the `ip` command
//! - Default-interface tracking by polling `/proc/net/route`
//! - Tunnel-bypass socket binding via `SO_BINDTODEVICE`
//!
//! ## Required Capabilities
//! - `CAP_NET_ADMIN`: for creating and configuring TUN devices
//! - Or run as root
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always set IFF_NO_PI to avoid packet info headers
//! - Device names are limited to 15 characters on Linux
//! - The route poller fires the observer on every cycle; change
//!   deduplication is the monitor's job, not ours

#![cfg(target_os = "linux")]

use std::ffi::CString;
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::libc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use veilink_common::types::Network;

use crate::error::{PlatformError, Result};
use crate::options::{IpPrefix, TunOptions};
use crate::traits::{
    DefaultInterface, InterfaceObserver, InterfaceUpdate, Platform, TunDescriptor,
};
use crate::tun::unix::FdTun;

// ============================================
// Constants
// ============================================

/// Path to the TUN clone device.
const TUN_DEVICE_PATH: &str = "/dev/net/tun";

/// IFF_TUN flag - TUN device (no Ethernet headers).
const IFF_TUN: libc::c_short = 0x0001;

/// IFF_NO_PI flag - do not prepend packet information.
const IFF_NO_PI: libc::c_short = 0x1000;

/// TUNSETIFF ioctl number.
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;

/// Default-interface poll interval.
const ROUTE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Device name used when the options don't request one.
const DEFAULT_DEVICE_NAME: &str = "veil0";

// ============================================
// ifreq Structure
// ============================================

/// Interface request structure for ioctl calls.
#[repr(C)]
struct IfReq {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_flags: libc::c_short,
    _padding: [u8; 22],
}

impl IfReq {
    fn new(name: &str) -> Self {
        let mut ifr = Self {
            ifr_name: [0; libc::IFNAMSIZ],
            ifr_flags: 0,
            _padding: [0; 22],
        };
        let name_bytes = name.as_bytes();
        let copy_len = name_bytes.len().min(libc::IFNAMSIZ - 1);
        for (i, &byte) in name_bytes[..copy_len].iter().enumerate() {
            ifr.ifr_name[i] = byte as libc::c_char;
        }
        ifr
    }

    fn name(&self) -> String {
        let bytes: Vec<u8> = self
            .ifr_name
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

// ============================================
// LinuxPlatform
// ============================================

/// Desktop Linux host adapter.
pub struct LinuxPlatform {
    /// Stop flag of the running route poller, if subscribed.
    poller_stop: Mutex<Option<Arc<AtomicBool>>>,
    /// Interface currently holding the default route.
    current_default: Arc<RwLock<Option<DefaultInterface>>>,
}

impl LinuxPlatform {
    /// Creates a new Linux platform adapter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poller_stop: Mutex::new(None),
            current_default: Arc::new(RwLock::new(None)),
        }
    }

    /// Reads the interface currently holding the IPv4 default route.
    fn read_default_route_interface() -> Option<String> {
        let content = std::fs::read_to_string("/proc/net/route").ok()?;
        for line in content.lines().skip(1) {
            let mut fields = line.split_whitespace();
            let iface = fields.next()?;
            let destination = fields.next()?;
            if destination == "00000000" {
                return Some(iface.to_owned());
            }
        }
        None
    }

    fn interface_index(name: &str) -> i32 {
        let Ok(c_name) = CString::new(name) else {
            return 0;
        };
        let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
        index as i32
    }

    fn run_ip(args: &[&str]) -> Result<()> {
        let output = Command::new("ip")
            .args(args)
            .output()
            .map_err(|e| PlatformError::io("run ip command", e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Re-adding an existing address or route is not a failure.
            if !stderr.contains("File exists") {
                return Err(PlatformError::tun_open_failed(format!(
                    "ip {}: {}",
                    args.join(" "),
                    stderr.trim()
                )));
            }
        }
        Ok(())
    }

    fn configure_device(
        name: &str,
        options: &TunOptions,
        route_ranges: &[IpPrefix],
    ) -> Result<()> {
        for prefix in options.inet4_address.iter().chain(&options.inet6_address) {
            Self::run_ip(&["addr", "add", &prefix.to_string(), "dev", name])?;
        }
        Self::run_ip(&["link", "set", "dev", name, "mtu", &options.mtu.to_string()])?;
        Self::run_ip(&["link", "set", "dev", name, "up"])?;

        for range in route_ranges {
            Self::run_ip(&["route", "add", &range.to_string(), "dev", name])?;
        }
        Ok(())
    }
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for LinuxPlatform {
    async fn open_tun(
        &self,
        options: &TunOptions,
        route_ranges: &[IpPrefix],
    ) -> Result<Box<dyn TunDescriptor>> {
        let requested = options.name.as_deref().unwrap_or(DEFAULT_DEVICE_NAME);
        debug!("opening TUN device '{}'", requested);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(TUN_DEVICE_PATH)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    PlatformError::PermissionDenied {
                        operation: format!("open {TUN_DEVICE_PATH}"),
                    }
                } else {
                    PlatformError::tun_open_failed(e.to_string())
                }
            })?;
        let fd = file.as_raw_fd();

        let mut ifr = IfReq::new(requested);
        ifr.ifr_flags = IFF_TUN | IFF_NO_PI;
        let result = unsafe { libc::ioctl(fd, TUNSETIFF, &mut ifr) };
        if result < 0 {
            return Err(PlatformError::tun_open_failed(format!(
                "TUNSETIFF failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        let actual_name = ifr.name();

        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0
            || unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0
        {
            return Err(PlatformError::tun_open_failed(
                "failed to set non-blocking mode",
            ));
        }

        Self::configure_device(&actual_name, options, route_ranges)?;
        debug!("TUN device '{}' configured", actual_name);

        Ok(Box::new(FdTun::new(OwnedFd::from(file))))
    }

    fn update_route_options(&self, options: &TunOptions) -> Result<()> {
        // Route updates re-derive ranges; device reconfiguration happens
        // on the next bridge start.
        let ranges = options.build_auto_route_ranges()?;
        debug!("route update requested: {} ranges", ranges.len());
        Ok(())
    }

    fn write_log(&self, message: &str) {
        eprintln!("{message}");
    }

    fn bind_to_default_interface(&self, raw_fd: i32) -> Result<()> {
        let name = self
            .current_default
            .read()
            .as_ref()
            .map(|iface| iface.name.clone())
            .ok_or_else(|| PlatformError::monitor_failed("no default interface tracked"))?;
        let c_name = CString::new(name.as_str())
            .map_err(|_| PlatformError::monitor_failed("interface name contains NUL"))?;
        let result = unsafe {
            libc::setsockopt(
                raw_fd,
                libc::SOL_SOCKET,
                libc::SO_BINDTODEVICE,
                c_name.as_ptr().cast(),
                name.len() as libc::socklen_t,
            )
        };
        if result < 0 {
            return Err(PlatformError::io(
                format!("bind fd {raw_fd} to '{name}'"),
                std::io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    fn find_connection_owner(
        &self,
        _network: Network,
        _source: SocketAddr,
        _destination: SocketAddr,
    ) -> Result<u32> {
        Err(PlatformError::unsupported("find_connection_owner"))
    }

    fn package_name_by_uid(&self, uid: u32) -> Result<String> {
        let user = nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid))
            .map_err(|e| PlatformError::io("uid lookup", e.into()))?
            .ok_or_else(|| PlatformError::unsupported(format!("unknown uid {uid}")))?;
        Ok(user.name)
    }

    fn uid_by_package_name(&self, package: &str) -> Result<u32> {
        let user = nix::unistd::User::from_name(package)
            .map_err(|e| PlatformError::io("user lookup", e.into()))?
            .ok_or_else(|| PlatformError::unsupported(format!("unknown user '{package}'")))?;
        Ok(user.uid.as_raw())
    }

    fn subscribe_default_interface(&self, observer: Arc<dyn InterfaceObserver>) -> Result<()> {
        let mut slot = self.poller_stop.lock();
        if slot.is_some() {
            return Err(PlatformError::monitor_failed(
                "default-interface monitor already subscribed",
            ));
        }

        let stop = Arc::new(AtomicBool::new(false));
        *slot = Some(Arc::clone(&stop));
        let current = Arc::clone(&self.current_default);

        tokio::spawn(async move {
            while !stop.load(Ordering::Relaxed) {
                if let Some(name) = Self::read_default_route_interface() {
                    let index = Self::interface_index(&name);
                    *current.write() = Some(DefaultInterface {
                        name: name.clone(),
                        index,
                    });
                    observer.on_default_interface_changed(InterfaceUpdate {
                        name,
                        index,
                        expensive: false,
                        constrained: false,
                    });
                }
                tokio::time::sleep(ROUTE_POLL_INTERVAL).await;
            }
            debug!("default-interface poller stopped");
        });
        Ok(())
    }

    fn unsubscribe_default_interface(&self) -> Result<()> {
        if let Some(stop) = self.poller_stop.lock().take() {
            stop.store(true, Ordering::Relaxed);
        } else {
            warn!("unsubscribe without active default-interface monitor");
        }
        Ok(())
    }

    fn include_all_networks(&self) -> bool {
        false
    }

    fn clear_dns_cache(&self) {
        // Desktop Linux resolvers manage their own caches.
        debug!("clear_dns_cache: no-op on this host");
    }
}

impl std::fmt::Debug for LinuxPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinuxPlatform")
            .field("default_interface", &*self.current_default.read())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    // Real TUN creation requires CAP_NET_ADMIN and is exercised by the
    // host, not by unit tests.

    #[test]
    fn test_ifreq_name_roundtrip() {
        let ifr = IfReq::new("veil0");
        assert_eq!(ifr.name(), "veil0");
    }

    #[test]
    fn test_ifreq_name_truncation() {
        let long_name = "a".repeat(32);
        let ifr = IfReq::new(&long_name);
        assert!(ifr.name().len() < libc::IFNAMSIZ);
    }

    #[test]
    fn test_unsupported_lookups() {
        let platform = LinuxPlatform::new();
        let source: SocketAddr = "10.0.0.1:1000".parse().unwrap();
        let dest: SocketAddr = "1.1.1.1:53".parse().unwrap();
        assert!(platform
            .find_connection_owner(Network::Udp, source, dest)
            .is_err());
    }
}
