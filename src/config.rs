/* src/config.rs */

//! Service configuration.
//!
//! Built once at startup from environment variables and shared read-only.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};
use crate::geo::{GeoConfig, GeoProviderKind, IPAPI_BASE_URL};
use crate::ratelimit::{DEFAULT_MAX_ENTRIES, DEFAULT_MAX_REQUESTS, RateLimitConfig};

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
const DEFAULT_GEO_TIMEOUT_SECS: u64 = 3;

/// Configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (`BIND_ADDRESS`, default `0.0.0.0:3000`)
    pub bind_address: SocketAddr,

    /// Rate limiting (`RATE_LIMIT_*`)
    pub rate_limit: RateLimitConfig,

    /// Geolocation enrichment (`ENABLE_GEOLOCATION`, `GEOLOCATION_*`)
    pub geolocation: GeoConfig,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Environment variables:
    /// - `BIND_ADDRESS`: socket address to listen on
    /// - `RATE_LIMIT_ENABLED`: `false` disables rate limiting
    /// - `RATE_LIMIT_MAX_REQUESTS`: requests per key per minute (default: 60)
    /// - `RATE_LIMIT_MAX_ENTRIES`: tracked keys before a forced sweep (default: 10000)
    /// - `ENABLE_GEOLOCATION`: `true` enables enrichment
    /// - `GEOLOCATION_PROVIDER`: `ipapi` or `none` (default: none)
    /// - `GEOLOCATION_TIMEOUT_SECS`: outbound lookup timeout (default: 3)
    /// - `GEOLOCATION_BASE_URL`: provider base URL (default: `https://ipapi.co`)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_address = lookup("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.into());
        let bind_address = bind_address
            .trim()
            .parse::<SocketAddr>()
            .map_err(|_| Error::InvalidBindAddress(bind_address.clone()))?;

        let rate_limit = RateLimitConfig {
            enabled: lookup("RATE_LIMIT_ENABLED").as_deref() != Some("false"),
            max_requests: positive(&lookup, "RATE_LIMIT_MAX_REQUESTS", DEFAULT_MAX_REQUESTS),
            max_entries: positive(&lookup, "RATE_LIMIT_MAX_ENTRIES", DEFAULT_MAX_ENTRIES),
            ..RateLimitConfig::default()
        };

        let provider = match lookup("GEOLOCATION_PROVIDER") {
            Some(value) => value.parse().unwrap_or_else(|unknown| {
                warn!(provider = %unknown, "Unsupported GEOLOCATION_PROVIDER; geolocation disabled");
                GeoProviderKind::None
            }),
            None => GeoProviderKind::None,
        };

        let geolocation = GeoConfig {
            enabled: lookup("ENABLE_GEOLOCATION").as_deref() == Some("true"),
            provider,
            base_url: lookup("GEOLOCATION_BASE_URL").unwrap_or_else(|| IPAPI_BASE_URL.into()),
            timeout: Duration::from_secs(positive(
                &lookup,
                "GEOLOCATION_TIMEOUT_SECS",
                DEFAULT_GEO_TIMEOUT_SECS,
            )),
        };

        Ok(Self {
            bind_address,
            rate_limit,
            geolocation,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            rate_limit: RateLimitConfig::default(),
            geolocation: GeoConfig::default(),
        }
    }
}

/// Parse a positive integer, falling back to `default` when the variable is
/// unset, unparsable or zero.
fn positive<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialEq + Default + Copy + std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };

    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => value,
        _ => {
            warn!(key, value = %raw, default = %default, "Ignoring invalid configuration value");
            default
        }
    }
}
