// ============================================
// File: crates/veilink-platform/src/options.rs
// ============================================
//! # TUN Options and Route Computation
//!
//! ## Creation Reason
//! Centralizes the interface addressing handed to the host when opening
//! a TUN descriptor, and the auto-route range computation derived from
//! it. Options are computed once at bridge start and immutable for the
//! session.
//!
//! ## Main Functionality
//! - `IpPrefix`: CIDR prefix with parsing, containment, and splitting
//! - `TunOptions`: interface addressing, MTU, DNS bootstrap, routing
//! - `build_auto_route_ranges`: include-ranges minus exclude-ranges by
//!   recursive prefix splitting
//!
//! ## Route Computation
//! ```text
//! base ranges   = include_routes, or the full address space of each
//!                 configured family
//! final ranges  = base ranges with every exclude_route carved out:
//!
//!     subtract(0.0.0.0/0, [192.168.0.0/16])
//!       → 0.0.0.0/1, 128.0.0.0/2, 192.0.0.0/9, 192.128.0.0/11, ...
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `IpPrefix` keeps the address exactly as written (interface
//!   addresses carry a host part); use `normalized()` for route entries
//! - Splitting recursion depth is bounded by the prefix length, worst
//!   case 128 levels

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use veilink_common::error::CommonError;

use crate::error::{PlatformError, Result};

// ============================================
// IpPrefix
// ============================================

/// A CIDR prefix: an address plus a prefix length.
///
/// Used both for interface addresses (host part preserved) and for
/// route entries (normalized to the network address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpPrefix {
    addr: IpAddr,
    prefix_len: u8,
}

impl IpPrefix {
    /// Creates a prefix from statically known parts.
    ///
    /// The prefix length must not exceed the family's bit width; use
    /// the `FromStr` implementation for untrusted input.
    #[must_use]
    pub const fn from_parts(addr: IpAddr, prefix_len: u8) -> Self {
        Self { addr, prefix_len }
    }

    /// Returns the address exactly as written.
    #[must_use]
    pub const fn address(&self) -> IpAddr {
        self.addr
    }

    /// Returns the prefix length.
    #[must_use]
    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Returns `true` for IPv4 prefixes.
    #[must_use]
    pub const fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    /// Total bit width of the address family.
    const fn total_bits(&self) -> u8 {
        if self.is_ipv4() {
            32
        } else {
            128
        }
    }

    fn addr_bits(addr: IpAddr) -> u128 {
        match addr {
            IpAddr::V4(v4) => u128::from(u32::from(v4)),
            IpAddr::V6(v6) => u128::from(v6),
        }
    }

    fn bits_to_addr(&self, bits: u128) -> IpAddr {
        if self.is_ipv4() {
            IpAddr::V4(Ipv4Addr::from(bits as u32))
        } else {
            IpAddr::V6(Ipv6Addr::from(bits))
        }
    }

    fn netmask_bits(&self) -> u128 {
        if self.prefix_len == 0 {
            return 0;
        }
        if self.is_ipv4() {
            u128::from(!0u32 << (32 - u32::from(self.prefix_len)))
        } else {
            !0u128 << (128 - u32::from(self.prefix_len))
        }
    }

    /// Returns the network address (host bits cleared).
    #[must_use]
    pub fn network(&self) -> IpAddr {
        self.bits_to_addr(Self::addr_bits(self.addr) & self.netmask_bits())
    }

    /// Returns this prefix with the host bits cleared.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            addr: self.network(),
            prefix_len: self.prefix_len,
        }
    }

    /// Returns `true` if `ip` falls inside this prefix.
    ///
    /// Always `false` across address families.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        if self.addr.is_ipv4() != ip.is_ipv4() {
            return false;
        }
        Self::addr_bits(ip) & self.netmask_bits() == Self::addr_bits(self.network())
    }

    /// Returns `true` if this prefix fully covers `other`.
    #[must_use]
    pub fn covers(&self, other: &Self) -> bool {
        self.is_ipv4() == other.is_ipv4()
            && self.prefix_len <= other.prefix_len
            && self.contains(other.network())
    }

    /// Returns `true` if the two prefixes share any address.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.covers(other) || other.covers(self)
    }

    /// Splits the prefix into its two halves.
    ///
    /// # Returns
    /// `None` for host routes (nothing left to split).
    #[must_use]
    pub fn split(&self) -> Option<(Self, Self)> {
        if self.prefix_len >= self.total_bits() {
            return None;
        }
        let child_len = self.prefix_len + 1;
        let low = Self {
            addr: self.network(),
            prefix_len: child_len,
        };
        let high_bit = 1u128 << (u32::from(self.total_bits()) - u32::from(child_len));
        let high = Self {
            addr: self.bits_to_addr(Self::addr_bits(self.network()) | high_bit),
            prefix_len: child_len,
        };
        Some((low, high))
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl FromStr for IpPrefix {
    type Err = PlatformError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (addr_part, len_part) = s
            .split_once('/')
            .ok_or_else(|| PlatformError::invalid_prefix(s, "missing '/'"))?;
        let addr: IpAddr = addr_part
            .parse()
            .map_err(|_| PlatformError::invalid_prefix(s, "invalid address"))?;
        let prefix_len: u8 = len_part
            .parse()
            .map_err(|_| PlatformError::invalid_prefix(s, "invalid prefix length"))?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix_len > max {
            return Err(PlatformError::invalid_prefix(
                s,
                format!("prefix length exceeds {max}"),
            ));
        }
        Ok(Self { addr, prefix_len })
    }
}

impl Serialize for IpPrefix {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for IpPrefix {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================
// TunOptions
// ============================================

fn default_inet4_address() -> Vec<IpPrefix> {
    vec![IpPrefix::from_parts(
        IpAddr::V4(Ipv4Addr::new(172, 19, 0, 1)),
        30,
    )]
}

fn default_inet6_address() -> Vec<IpPrefix> {
    vec![IpPrefix::from_parts(
        IpAddr::V6(Ipv6Addr::new(0xfdfe, 0xdcba, 0x9876, 0, 0, 0, 0, 1)),
        126,
    )]
}

fn default_dns_servers() -> Vec<IpAddr> {
    vec![IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))]
}

fn default_mtu() -> u32 {
    9000
}

fn default_auto_route() -> bool {
    true
}

/// TUN interface addressing and routing options.
///
/// Computed once at bridge start and immutable for the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunOptions {
    /// Interface IPv4 addresses with their prefixes.
    #[serde(default = "default_inet4_address")]
    pub inet4_address: Vec<IpPrefix>,
    /// Interface IPv6 addresses with their prefixes.
    #[serde(default = "default_inet6_address")]
    pub inet6_address: Vec<IpPrefix>,
    /// DNS bootstrap servers pushed to the host.
    #[serde(default = "default_dns_servers")]
    pub dns_servers: Vec<IpAddr>,
    /// Interface MTU.
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    /// Whether routes should be installed automatically.
    #[serde(default = "default_auto_route")]
    pub auto_route: bool,
    /// Whether non-tunnel routes should be blocked.
    #[serde(default)]
    pub strict_route: bool,
    /// Route ranges to include instead of the full address space.
    #[serde(default)]
    pub include_routes: Vec<IpPrefix>,
    /// Route ranges carved out of the included ranges.
    #[serde(default)]
    pub exclude_routes: Vec<IpPrefix>,
    /// Requested interface name; the host may assign its own.
    #[serde(default)]
    pub name: Option<String>,
}

impl Default for TunOptions {
    fn default() -> Self {
        Self {
            inet4_address: default_inet4_address(),
            inet6_address: default_inet6_address(),
            dns_servers: default_dns_servers(),
            mtu: default_mtu(),
            auto_route: default_auto_route(),
            strict_route: false,
            include_routes: Vec::new(),
            exclude_routes: Vec::new(),
            name: None,
        }
    }
}

impl TunOptions {
    /// Computes the auto-route ranges for this addressing.
    ///
    /// Include ranges default to the full address space of every family
    /// that has an interface address; exclude ranges are carved out by
    /// prefix splitting. Returns an empty list when auto-route is off.
    ///
    /// # Errors
    /// Returns an error when auto-route is requested but no interface
    /// address is configured.
    pub fn build_auto_route_ranges(&self) -> Result<Vec<IpPrefix>> {
        if !self.auto_route {
            return Ok(Vec::new());
        }
        if self.inet4_address.is_empty() && self.inet6_address.is_empty() {
            return Err(CommonError::invalid_input(
                "tunnel",
                "auto-route requires at least one interface address",
            )
            .into());
        }

        let mut bases = Vec::new();
        if self.include_routes.is_empty() {
            if !self.inet4_address.is_empty() {
                bases.push(IpPrefix::from_parts(
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    0,
                ));
            }
            if !self.inet6_address.is_empty() {
                bases.push(IpPrefix::from_parts(
                    IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                    0,
                ));
            }
        } else {
            bases.extend(self.include_routes.iter().map(IpPrefix::normalized));
        }

        let exclusions: Vec<IpPrefix> = self
            .exclude_routes
            .iter()
            .map(IpPrefix::normalized)
            .collect();

        let mut ranges = Vec::new();
        for base in bases {
            ranges.extend(subtract(base, &exclusions));
        }
        Ok(ranges)
    }

    /// Validates option invariants.
    ///
    /// # Errors
    /// Returns an error for out-of-range MTU values.
    pub fn validate(&self) -> Result<()> {
        if self.mtu < 576 {
            return Err(
                CommonError::invalid_input("mtu", "must be at least 576 bytes").into(),
            );
        }
        if self.mtu > 65535 {
            return Err(CommonError::invalid_input("mtu", "cannot exceed 65535 bytes").into());
        }
        Ok(())
    }
}

/// Carves `exclusions` out of `range` by recursive prefix splitting.
fn subtract(range: IpPrefix, exclusions: &[IpPrefix]) -> Vec<IpPrefix> {
    if exclusions.iter().any(|e| e.covers(&range)) {
        return Vec::new();
    }
    if !exclusions.iter().any(|e| e.overlaps(&range)) {
        return vec![range];
    }
    match range.split() {
        Some((low, high)) => {
            let mut out = subtract(low, exclusions);
            out.extend(subtract(high, exclusions));
            out
        }
        // A host route overlapping an exclusion is always covered by it,
        // so this arm is unreachable; keep it total regardless.
        None => Vec::new(),
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(s: &str) -> IpPrefix {
        s.parse().unwrap()
    }

    #[test]
    fn test_prefix_parse_display() {
        let p = prefix("172.19.0.1/30");
        assert_eq!(p.address(), IpAddr::V4(Ipv4Addr::new(172, 19, 0, 1)));
        assert_eq!(p.prefix_len(), 30);
        assert_eq!(p.to_string(), "172.19.0.1/30");
        assert_eq!(p.network(), IpAddr::V4(Ipv4Addr::new(172, 19, 0, 0)));
    }

    #[test]
    fn test_prefix_parse_errors() {
        assert!("10.0.0.1".parse::<IpPrefix>().is_err());
        assert!("10.0.0.1/33".parse::<IpPrefix>().is_err());
        assert!("fdfe::1/129".parse::<IpPrefix>().is_err());
        assert!("not-an-ip/8".parse::<IpPrefix>().is_err());
    }

    #[test]
    fn test_prefix_contains() {
        let p = prefix("192.168.0.0/16");
        assert!(p.contains("192.168.44.5".parse().unwrap()));
        assert!(!p.contains("192.169.0.1".parse().unwrap()));
        assert!(!p.contains("fdfe::1".parse().unwrap()));

        let v6 = prefix("fdfe:dcba:9876::/48");
        assert!(v6.contains("fdfe:dcba:9876::42".parse().unwrap()));
        assert!(!v6.contains("fdfe:dcba:9877::1".parse().unwrap()));
    }

    #[test]
    fn test_prefix_covers_and_overlaps() {
        let wide = prefix("10.0.0.0/8");
        let narrow = prefix("10.1.0.0/16");
        let other = prefix("11.0.0.0/8");

        assert!(wide.covers(&narrow));
        assert!(!narrow.covers(&wide));
        assert!(wide.overlaps(&narrow));
        assert!(narrow.overlaps(&wide));
        assert!(!wide.overlaps(&other));
    }

    #[test]
    fn test_prefix_split() {
        let (low, high) = prefix("0.0.0.0/0").split().unwrap();
        assert_eq!(low, prefix("0.0.0.0/1"));
        assert_eq!(high, prefix("128.0.0.0/1"));

        assert!(prefix("10.0.0.1/32").split().is_none());
        assert!(prefix("fdfe::1/128").split().is_none());
    }

    #[test]
    fn test_subtract_simple_half() {
        let ranges = subtract(prefix("0.0.0.0/0"), &[prefix("128.0.0.0/1")]);
        assert_eq!(ranges, vec![prefix("0.0.0.0/1")]);
    }

    #[test]
    fn test_subtract_covered_is_empty() {
        let ranges = subtract(prefix("10.1.0.0/16"), &[prefix("10.0.0.0/8")]);
        assert!(ranges.is_empty());
    }

    #[test]
    fn test_subtract_carves_exclusion() {
        let ranges = subtract(prefix("0.0.0.0/0"), &[prefix("192.168.0.0/16")]);

        // One prefix per split level from /1 down to /16.
        assert_eq!(ranges.len(), 16);
        let excluded: IpAddr = "192.168.1.1".parse().unwrap();
        let kept: IpAddr = "8.8.8.8".parse().unwrap();
        assert!(!ranges.iter().any(|r| r.contains(excluded)));
        assert!(ranges.iter().any(|r| r.contains(kept)));
    }

    #[test]
    fn test_auto_route_ranges_defaults() {
        let options = TunOptions::default();
        let ranges = options.build_auto_route_ranges().unwrap();
        assert_eq!(ranges, vec![prefix("0.0.0.0/0"), prefix("::/0")]);
    }

    #[test]
    fn test_auto_route_disabled() {
        let options = TunOptions {
            auto_route: false,
            ..TunOptions::default()
        };
        assert!(options.build_auto_route_ranges().unwrap().is_empty());
    }

    #[test]
    fn test_auto_route_requires_addresses() {
        let options = TunOptions {
            inet4_address: Vec::new(),
            inet6_address: Vec::new(),
            ..TunOptions::default()
        };
        assert!(options.build_auto_route_ranges().is_err());
    }

    #[test]
    fn test_auto_route_include_exclude() {
        let options = TunOptions {
            include_routes: vec![prefix("0.0.0.0/1")],
            exclude_routes: vec![prefix("10.0.0.0/8")],
            ..TunOptions::default()
        };
        let ranges = options.build_auto_route_ranges().unwrap();
        assert!(!ranges.iter().any(|r| r.contains("10.1.2.3".parse().unwrap())));
        assert!(ranges.iter().any(|r| r.contains("1.1.1.1".parse().unwrap())));
        // Everything stays inside the include range.
        let include = prefix("0.0.0.0/1");
        assert!(ranges.iter().all(|r| include.covers(r)));
    }

    #[test]
    fn test_options_validate_mtu() {
        let mut options = TunOptions::default();
        assert!(options.validate().is_ok());

        options.mtu = 100;
        assert!(options.validate().is_err());
    }
}
