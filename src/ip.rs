/* src/ip.rs */

//! String-level IP parsing and classification.
//!
//! Every function accepts the raw text found in a header value, strips an
//! optional port and classifies the parsed address. Nothing here performs I/O.

use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Address family of a detected IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IpVersion {
    #[serde(rename = "IPv4")]
    V4,
    #[serde(rename = "IPv6")]
    V6,
    /// The value did not parse as an IP address.
    Unknown,
}

impl IpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V4 => "IPv4",
            Self::V6 => "IPv6",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing category of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IpCategory {
    Public,
    Private,
    #[serde(rename = "CGNAT")]
    Cgnat,
    Loopback,
    #[serde(rename = "Link-Local")]
    LinkLocal,
}

impl IpCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "Public",
            Self::Private => "Private",
            Self::Cgnat => "CGNAT",
            Self::Loopback => "Loopback",
            Self::LinkLocal => "Link-Local",
        }
    }
}

impl fmt::Display for IpCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Special-purpose block an address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Range {
    Unspecified,
    Broadcast,
    Multicast,
    LinkLocal,
    Loopback,
    CarrierGradeNat,
    Private,
    UniqueLocal,
    Unicast,
}

impl Range {
    fn of(ip: IpAddr) -> Self {
        match ip.to_canonical() {
            IpAddr::V4(v4) => Self::of_v4(v4),
            IpAddr::V6(v6) => Self::of_v6(v6),
        }
    }

    fn of_v4(ip: Ipv4Addr) -> Self {
        if ip.octets()[0] == 0 {
            Self::Unspecified
        } else if ip.is_broadcast() {
            Self::Broadcast
        } else if ip.is_multicast() {
            Self::Multicast
        } else if ip.is_link_local() {
            Self::LinkLocal
        } else if ip.is_loopback() {
            Self::Loopback
        } else if in_cgnat(ip) {
            Self::CarrierGradeNat
        } else if ip.is_private() {
            Self::Private
        } else {
            Self::Unicast
        }
    }

    fn of_v6(ip: Ipv6Addr) -> Self {
        let head = ip.segments()[0];
        if ip.is_unspecified() {
            Self::Unspecified
        } else if ip.is_loopback() {
            Self::Loopback
        } else if ip.is_multicast() {
            Self::Multicast
        } else if (head & 0xffc0) == 0xfe80 {
            Self::LinkLocal
        } else if (head & 0xfe00) == 0xfc00 {
            Self::UniqueLocal
        } else {
            Self::Unicast
        }
    }

    fn is_non_public(self) -> bool {
        !matches!(self, Self::Multicast | Self::Unicast)
    }
}

/// `100.64.0.0/10`
fn in_cgnat(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    a == 100 && (b & 0xc0) == 64
}

/// Remove a trailing `:port` from a header value.
///
/// Handles bracketed IPv6 (`[::1]:443`) and dotted IPv4 with a single colon
/// (`1.2.3.4:3000`). A bare IPv6 address is returned as-is, and so is an
/// IPv4-mapped IPv6 literal such as `::ffff:1.2.3.4`.
///
/// # Examples
///
/// ```rust
/// use myip::ip::strip_port;
///
/// assert_eq!(strip_port("1.2.3.4:3000"), "1.2.3.4");
/// assert_eq!(strip_port("[2001:db8::1]:443"), "2001:db8::1");
/// assert_eq!(strip_port("2001:db8::1"), "2001:db8::1");
/// ```
pub fn strip_port(value: &str) -> &str {
    let ip = value.trim();

    if let Some(rest) = ip.strip_prefix('[') {
        if let Some((host, port)) = rest.rsplit_once("]:") {
            if is_bracket_host(host) && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
            {
                return host;
            }
        }
        if let Some(host) = rest.strip_suffix(']') {
            if is_bracket_host(host) {
                return host;
            }
        }
        return ip;
    }

    if ip.contains('.') && ip.matches(':').count() == 1 {
        if let Some((host, _port)) = ip.rsplit_once(':') {
            return host;
        }
    }

    ip
}

fn is_bracket_host(host: &str) -> bool {
    !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == ':' || c == '.')
}

/// Parse a header value into an address after stripping any port.
pub fn parse_ip(value: &str) -> Option<IpAddr> {
    strip_port(value).parse().ok()
}

/// Whether the value is a syntactically valid IPv4 or IPv6 address.
pub fn is_valid_ip(value: &str) -> bool {
    parse_ip(value).is_some()
}

/// Address family of the value, or [`IpVersion::Unknown`] if it does not parse.
pub fn detect_ip_version(value: &str) -> IpVersion {
    match parse_ip(value) {
        Some(IpAddr::V4(_)) => IpVersion::V4,
        Some(IpAddr::V6(_)) => IpVersion::V6,
        None => IpVersion::Unknown,
    }
}

/// Whether the address belongs to a private-use, loopback, link-local,
/// unique-local, unspecified, broadcast or carrier-grade NAT block.
///
/// Unparsable input yields `false`; callers must not read `false` as "public".
pub fn is_private_ip(value: &str) -> bool {
    parse_ip(value).is_some_and(|ip| Range::of(ip).is_non_public())
}

/// Whether the address is IPv4 inside `100.64.0.0/10`.
pub fn is_cgnat(value: &str) -> bool {
    match parse_ip(value).map(|ip| ip.to_canonical()) {
        Some(IpAddr::V4(v4)) => in_cgnat(v4),
        _ => false,
    }
}

/// Categorize an address for display.
///
/// Unparsable input is reported as [`IpCategory::Private`]. Carrier-grade NAT
/// is checked before the generic private ranges.
///
/// # Examples
///
/// ```rust
/// use myip::ip::{IpCategory, ip_category};
///
/// assert_eq!(ip_category("100.64.5.5"), IpCategory::Cgnat);
/// assert_eq!(ip_category("8.8.8.8"), IpCategory::Public);
/// ```
pub fn ip_category(value: &str) -> IpCategory {
    let Some(ip) = parse_ip(value) else {
        return IpCategory::Private;
    };

    match Range::of(ip) {
        Range::CarrierGradeNat => IpCategory::Cgnat,
        Range::Loopback => IpCategory::Loopback,
        Range::LinkLocal => IpCategory::LinkLocal,
        range if range.is_non_public() => IpCategory::Private,
        _ => IpCategory::Public,
    }
}
