/* src/geo.rs */

//! Optional geolocation enrichment.
//!
//! Providers are untrusted: their payload goes through [`parse_ipapi`], which
//! either yields a fully typed [`GeoLookup`] or rejects the whole response.

use async_trait::async_trait;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::Result;
use crate::types::{Coordinates, GeoLocation, IspInfo};

pub const IPAPI_BASE_URL: &str = "https://ipapi.co";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
const USER_AGENT: &str = "whats-my-ip-app/1.0";

/// Errors from a single lookup. These never leave the detector.
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("Geolocation request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Geolocation provider returned HTTP {0}")]
    Status(u16),

    #[error("Geolocation response rejected: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("Geolocation provider reported an error: {0}")]
    Provider(String),
}

/// Supported lookup services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeoProviderKind {
    #[default]
    None,
    IpApi,
}

impl FromStr for GeoProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "ipapi" => Ok(Self::IpApi),
            other => Err(other.to_string()),
        }
    }
}

/// Geolocation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoConfig {
    pub enabled: bool,
    pub provider: GeoProviderKind,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: GeoProviderKind::None,
            base_url: IPAPI_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Location and network owner of an address.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeoLookup {
    pub location: GeoLocation,
    pub isp: IspInfo,
}

/// A third-party geolocation service.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn lookup(&self, ip: &str) -> std::result::Result<GeoLookup, GeoError>;
}

/// Build the provider selected by `config`, or `None` when enrichment is off.
pub fn provider_from_config(config: &GeoConfig) -> Result<Option<Arc<dyn GeoProvider>>> {
    if !config.enabled {
        return Ok(None);
    }

    match config.provider {
        GeoProviderKind::None => Ok(None),
        GeoProviderKind::IpApi => {
            let provider = IpApiProvider::new(&config.base_url, config.timeout)?;
            Ok(Some(Arc::new(provider)))
        }
    }
}

/// Client for `https://ipapi.co/{ip}/json/`.
#[derive(Debug, Clone)]
pub struct IpApiProvider {
    client: reqwest::Client,
    base_url: String,
}

impl IpApiProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl GeoProvider for IpApiProvider {
    fn name(&self) -> &'static str {
        "ipapi"
    }

    async fn lookup(&self, ip: &str) -> std::result::Result<GeoLookup, GeoError> {
        let url = format!("{}/{}/json/", self.base_url, ip);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeoError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        parse_ipapi(&body)
    }
}

/// Raw ipapi.co payload. Every field may be absent or null; a present field
/// of the wrong type rejects the payload.
#[derive(Debug, Deserialize)]
struct IpApiPayload {
    #[serde(default)]
    error: bool,
    reason: Option<String>,
    city: Option<String>,
    region: Option<String>,
    country_code: Option<String>,
    timezone: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    asn: Option<String>,
    org: Option<String>,
}

/// Parse an ipapi.co response body.
pub fn parse_ipapi(body: &[u8]) -> std::result::Result<GeoLookup, GeoError> {
    let payload: IpApiPayload = serde_json::from_slice(body)?;

    if payload.error {
        return Err(GeoError::Provider(
            payload.reason.unwrap_or_else(|| "unspecified".to_string()),
        ));
    }

    Ok(GeoLookup {
        location: GeoLocation {
            city: payload.city,
            region: payload.region,
            country: payload.country_code,
            timezone: payload.timezone,
            coordinates: Coordinates {
                latitude: payload.latitude,
                longitude: payload.longitude,
            },
        },
        isp: IspInfo {
            name: payload.org.clone(),
            asn: payload.asn,
            organization: payload.org,
        },
    })
}
