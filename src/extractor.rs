/* src/extractor.rs */

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::ip::{is_private_ip, strip_port};
use crate::types::DetectionSource;

/// Type alias for header maps. Keys are lower-case header names; repeated
/// headers are joined with `", "`.
pub type HeaderMap = HashMap<String, String>;

/// Address reported when no header yields a candidate.
pub const FALLBACK_IP: &str = "0.0.0.0";

/// Rate limit bucket for requests without any client address header.
pub const UNKNOWN_KEY: &str = "unknown";

/// Headers carrying a single address, in order of preference.
const DIRECT_HEADERS: [(&str, DetectionSource); 2] = [
    ("cf-connecting-ip", DetectionSource::Cloudflare),
    ("x-real-ip", DetectionSource::XRealIp),
];

static FORWARDED_FOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)for=([^;,\s]+)").expect("static regex is valid"));

/// Address chosen from the request headers, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub ip: String,
    pub source: DetectionSource,
}

impl Candidate {
    fn new(ip: impl Into<String>, source: DetectionSource) -> Self {
        Self {
            ip: ip.into(),
            source,
        }
    }

    /// The `0.0.0.0` candidate reported when detection fails.
    pub fn fallback() -> Self {
        Self::new(FALLBACK_IP, DetectionSource::Fallback)
    }
}

/// Walk the header priority chain and return the first usable candidate.
///
/// Order: `cf-connecting-ip`, `x-real-ip`, `x-forwarded-for`, `forwarded`.
/// When nothing matches, the candidate is `0.0.0.0` with
/// [`DetectionSource::Fallback`].
///
/// # Examples
///
/// ```rust
/// use myip::extractor::{HeaderMap, pick_candidate};
/// use myip::types::DetectionSource;
///
/// let mut headers = HeaderMap::new();
/// headers.insert("x-forwarded-for".to_string(), "10.0.0.2, 198.51.100.7:5000".to_string());
///
/// let candidate = pick_candidate(&headers);
/// assert_eq!(candidate.ip, "198.51.100.7");
/// assert_eq!(candidate.source, DetectionSource::XForwardedFor);
/// ```
pub fn pick_candidate(headers: &HeaderMap) -> Candidate {
    for (name, source) in DIRECT_HEADERS {
        if let Some(value) = header(headers, name) {
            return Candidate::new(strip_port(value), source);
        }
    }

    if let Some(ip) = header(headers, "x-forwarded-for").and_then(pick_forwarded_for) {
        return Candidate::new(ip, DetectionSource::XForwardedFor);
    }

    if let Some(ip) = header(headers, "forwarded").and_then(parse_forwarded) {
        return Candidate::new(ip, DetectionSource::Forwarded);
    }

    Candidate::fallback()
}

/// Pick a hop from an `X-Forwarded-For` chain.
///
/// Hops nearer the server are usually internal load balancers, so the first
/// hop outside the private ranges wins. If every hop is private the leftmost
/// one is returned.
pub fn pick_forwarded_for(value: &str) -> Option<&str> {
    let hops: Vec<&str> = value
        .split(',')
        .map(strip_port)
        .filter(|hop| !hop.is_empty())
        .collect();

    hops.iter()
        .find(|hop| !is_private_ip(hop))
        .or_else(|| hops.first())
        .copied()
}

/// Extract the `for=` node from an RFC 7239 `Forwarded` header.
pub fn parse_forwarded(value: &str) -> Option<String> {
    let node = FORWARDED_FOR.captures(value)?.get(1)?.as_str().replace('"', "");
    let host = strip_port(&node);
    let host = host.strip_prefix('[').unwrap_or(host);
    let host = host.strip_suffix(']').unwrap_or(host);

    (!host.is_empty()).then(|| host.to_string())
}

/// Derive the rate limit key from the same header chain used for detection.
///
/// This does not validate anything: the raw `cf-connecting-ip`, `x-real-ip`
/// or first `x-forwarded-for` hop is used, or [`UNKNOWN_KEY`].
pub fn rate_limit_key(headers: &HeaderMap) -> &str {
    headers
        .get("cf-connecting-ip")
        .or_else(|| headers.get("x-real-ip"))
        .map(String::as_str)
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|chain| chain.split(',').next())
                .map(str::trim)
        })
        .unwrap_or(UNKNOWN_KEY)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}
