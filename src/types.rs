/* src/types.rs */

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

use crate::ip::{IpCategory, IpVersion};

/// Header that produced the reported address, in trust order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionSource {
    Cloudflare,
    XRealIp,
    XForwardedFor,
    Forwarded,
    /// No header yielded an address.
    Fallback,
}

impl DetectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cloudflare => "cloudflare",
            Self::XRealIp => "x-real-ip",
            Self::XForwardedFor => "x-forwarded-for",
            Self::Forwarded => "forwarded",
            Self::Fallback => "fallback",
        }
    }

    /// `X-Forwarded-For` and `Forwarded` carry a chain of hops rather than a
    /// single address set by a trusted edge.
    pub fn is_forwarding_chain(&self) -> bool {
        matches!(self, Self::XForwardedFor | Self::Forwarded)
    }
}

impl fmt::Display for DetectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

/// Request metadata echoed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub user_agent: String,
    pub language: String,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Coordinates {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct GeoLocation {
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub timezone: Option<String>,
    pub coordinates: Coordinates,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct IspInfo {
    pub name: Option<String>,
    pub asn: Option<String>,
    pub organization: Option<String>,
}

/// Result of detecting the client address for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpInfo {
    pub ip: String,
    pub ip_version: IpVersion,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub is_public: bool,
    pub source: DetectionSource,
    pub category: IpCategory,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub warnings: Vec<String>,
    pub request: RequestInfo,
    pub location: Option<GeoLocation>,
    pub isp: Option<IspInfo>,
}

/// ISO-8601 in UTC with millisecond precision, e.g. `2026-02-08T00:00:00.000Z`.
pub fn iso_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn serialize_timestamp<S>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&iso_timestamp(at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample() -> IpInfo {
        IpInfo {
            ip: "203.0.113.42".to_string(),
            ip_version: IpVersion::V4,
            ipv4: Some("203.0.113.42".to_string()),
            ipv6: None,
            is_public: true,
            source: DetectionSource::XRealIp,
            category: IpCategory::Public,
            timestamp: Utc.with_ymd_and_hms(2026, 2, 8, 0, 0, 0).unwrap(),
            warnings: vec![],
            request: RequestInfo {
                user_agent: "Test UA".to_string(),
                language: "en-US".to_string(),
                protocol: Protocol::Https,
            },
            location: None,
            isp: None,
        }
    }

    #[test]
    fn test_ip_info_json_shape() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            value,
            json!({
                "ip": "203.0.113.42",
                "ipVersion": "IPv4",
                "ipv4": "203.0.113.42",
                "ipv6": null,
                "isPublic": true,
                "source": "x-real-ip",
                "category": "Public",
                "timestamp": "2026-02-08T00:00:00.000Z",
                "warnings": [],
                "request": {
                    "userAgent": "Test UA",
                    "language": "en-US",
                    "protocol": "https"
                },
                "location": null,
                "isp": null
            })
        );
    }

    #[test]
    fn test_source_names() {
        for source in [
            DetectionSource::Cloudflare,
            DetectionSource::XRealIp,
            DetectionSource::XForwardedFor,
            DetectionSource::Forwarded,
            DetectionSource::Fallback,
        ] {
            let encoded = serde_json::to_string(&source).unwrap();
            assert_eq!(encoded, format!("\"{}\"", source.as_str()));
        }
    }

    #[test]
    fn test_forwarding_chain_sources() {
        assert!(DetectionSource::XForwardedFor.is_forwarding_chain());
        assert!(DetectionSource::Forwarded.is_forwarding_chain());
        assert!(!DetectionSource::XRealIp.is_forwarding_chain());
        assert!(!DetectionSource::Fallback.is_forwarding_chain());
    }
}
