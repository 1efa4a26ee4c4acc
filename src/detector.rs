/* src/detector.rs */

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::extractor::{Candidate, FALLBACK_IP, HeaderMap, pick_candidate};
use crate::geo::{GeoConfig, GeoLookup, GeoProvider, provider_from_config};
use crate::ip::{IpCategory, IpVersion, detect_ip_version, ip_category, parse_ip};
use crate::types::{DetectionSource, GeoLocation, IpInfo, IspInfo, Protocol, RequestInfo};

pub const PROXY_WARNING: &str =
    "IP detected via proxy header; may differ when using VPN, Tor, or relay services.";
pub const DETECTION_WARNING: &str =
    "Unable to determine a reliable public IP from request headers.";
pub const GEO_UNAVAILABLE_WARNING: &str = "Geolocation unavailable. Set ENABLE_GEOLOCATION=true and GEOLOCATION_PROVIDER=ipapi for opt-in third-party lookup.";

/// Turns request headers into an [`IpInfo`].
#[derive(Clone, Default)]
pub struct IpDetector {
    geo: Option<Arc<dyn GeoProvider>>,
}

impl std::fmt::Debug for IpDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpDetector")
            .field("geo", &self.geo.as_ref().map(|provider| provider.name()))
            .finish()
    }
}

impl IpDetector {
    /// Create a detector; `geo` is `None` when enrichment is disabled.
    pub fn new(geo: Option<Arc<dyn GeoProvider>>) -> Self {
        Self { geo }
    }

    /// Create a detector with the provider selected by `config`.
    pub fn from_config(config: &GeoConfig) -> Result<Self> {
        Ok(Self::new(provider_from_config(config)?))
    }

    pub fn geolocation_enabled(&self) -> bool {
        self.geo.is_some()
    }

    /// Detect the client address for one request.
    ///
    /// Never fails: missing headers, and a chosen header value that is not an
    /// IP address, degrade to the `0.0.0.0` fallback. Geolocation failures
    /// degrade to `null` fields plus a warning.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use myip::{IpDetector, extractor::HeaderMap, is_valid_detection};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let mut headers = HeaderMap::new();
    /// headers.insert("cf-connecting-ip".to_string(), "198.51.100.42".to_string());
    ///
    /// let info = IpDetector::default().detect(&headers, false).await;
    /// assert_eq!(info.ip, "198.51.100.42");
    /// assert!(info.is_public);
    /// assert!(is_valid_detection(&info));
    /// # }
    /// ```
    pub async fn detect(&self, headers: &HeaderMap, include_geo: bool) -> IpInfo {
        let candidate = pick_candidate(headers);
        let candidate = if parse_ip(&candidate.ip).is_some() {
            candidate
        } else {
            debug!(
                value = %candidate.ip,
                source = %candidate.source,
                "Header value is not an IP address"
            );
            Candidate::fallback()
        };
        let ip_version = match candidate.source {
            DetectionSource::Fallback => IpVersion::Unknown,
            _ => detect_ip_version(&candidate.ip),
        };
        let category = ip_category(&candidate.ip);
        let mut warnings = detection_warnings(&candidate, ip_version, category);

        let (location, isp) = if include_geo {
            self.enrich(&candidate.ip, ip_version, &mut warnings).await
        } else {
            (None, None)
        };

        debug!(
            ip = %candidate.ip,
            source = %candidate.source,
            category = %category,
            "Detected client address"
        );

        IpInfo {
            ipv4: (ip_version == IpVersion::V4).then(|| candidate.ip.clone()),
            ipv6: (ip_version == IpVersion::V6).then(|| candidate.ip.clone()),
            ip: candidate.ip,
            ip_version,
            is_public: category == IpCategory::Public,
            source: candidate.source,
            category,
            timestamp: Utc::now(),
            warnings,
            request: request_info(headers),
            location,
            isp,
        }
    }

    async fn enrich(
        &self,
        ip: &str,
        ip_version: IpVersion,
        warnings: &mut Vec<String>,
    ) -> (Option<GeoLocation>, Option<IspInfo>) {
        let Some(provider) = &self.geo else {
            return (None, None);
        };

        if ip_version == IpVersion::Unknown {
            debug!(ip, "Skipping geolocation for unparsable address");
            warnings.push(GEO_UNAVAILABLE_WARNING.to_string());
            return (None, None);
        }

        match provider.lookup(ip).await {
            Ok(GeoLookup { location, isp }) => (Some(location), Some(isp)),
            Err(err) => {
                warn!(provider = provider.name(), ip, error = %err, "Geolocation lookup failed");
                warnings.push(GEO_UNAVAILABLE_WARNING.to_string());
                (None, None)
            }
        }
    }
}

/// Whether the result is a real detection rather than the fallback.
///
/// Only the `0.0.0.0` / `Unknown` pair is rejected; a private or loopback
/// address is still a valid result.
pub fn is_valid_detection(info: &IpInfo) -> bool {
    !(info.ip == FALLBACK_IP && info.ip_version == IpVersion::Unknown)
}

fn detection_warnings(
    candidate: &Candidate,
    ip_version: IpVersion,
    category: IpCategory,
) -> Vec<String> {
    let mut warnings = Vec::new();

    if category != IpCategory::Public {
        warnings.push(format!("Address category: {category}"));
    }
    if candidate.source.is_forwarding_chain() {
        warnings.push(PROXY_WARNING.to_string());
    }
    if candidate.source == DetectionSource::Fallback || ip_version == IpVersion::Unknown {
        warnings.push(DETECTION_WARNING.to_string());
    }

    warnings
}

fn request_info(headers: &HeaderMap) -> RequestInfo {
    let user_agent = headers
        .get("user-agent")
        .cloned()
        .unwrap_or_else(|| "Unknown".to_string());
    let language = headers
        .get("accept-language")
        .and_then(|value| value.split(',').next())
        .map(|lang| lang.trim().to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let protocol = match headers.get("x-forwarded-proto").map(String::as_str) {
        Some("https") => Protocol::Https,
        _ => Protocol::Http,
    };

    RequestInfo {
        user_agent,
        language,
        protocol,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoError;
    use crate::types::Coordinates;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    impl StubProvider {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl GeoProvider for StubProvider {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn lookup(&self, _ip: &str) -> std::result::Result<GeoLookup, GeoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GeoError::Status(503));
            }
            Ok(GeoLookup {
                location: GeoLocation {
                    city: Some("Amsterdam".to_string()),
                    region: Some("North Holland".to_string()),
                    country: Some("NL".to_string()),
                    timezone: Some("Europe/Amsterdam".to_string()),
                    coordinates: Coordinates {
                        latitude: Some(52.37),
                        longitude: Some(4.89),
                    },
                },
                isp: IspInfo {
                    name: Some("Example Net".to_string()),
                    asn: Some("AS64500".to_string()),
                    organization: Some("Example Net".to_string()),
                },
            })
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_public_address_has_no_warnings() {
        let info = IpDetector::default()
            .detect(&headers(&[("x-real-ip", "203.0.113.42")]), false)
            .await;

        assert_eq!(info.ip, "203.0.113.42");
        assert_eq!(info.ip_version, IpVersion::V4);
        assert_eq!(info.ipv4.as_deref(), Some("203.0.113.42"));
        assert_eq!(info.ipv6, None);
        assert_eq!(info.source, DetectionSource::XRealIp);
        assert_eq!(info.category, IpCategory::Public);
        assert!(info.is_public);
        assert!(info.warnings.is_empty());
        assert!(info.location.is_none());
        assert!(info.isp.is_none());
    }

    #[tokio::test]
    async fn test_forwarded_private_address_warnings_in_order() {
        let info = IpDetector::default()
            .detect(&headers(&[("x-forwarded-for", "10.0.0.1, 192.168.1.1")]), false)
            .await;

        assert_eq!(info.ip, "10.0.0.1");
        assert_eq!(info.category, IpCategory::Private);
        assert!(!info.is_public);
        assert_eq!(
            info.warnings,
            vec!["Address category: Private".to_string(), PROXY_WARNING.to_string()]
        );
        assert!(is_valid_detection(&info));
    }

    #[tokio::test]
    async fn test_ipv6_fields() {
        let info = IpDetector::default()
            .detect(&headers(&[("forwarded", "for=\"[2001:db8::1]:443\"")]), false)
            .await;

        assert_eq!(info.ip, "2001:db8::1");
        assert_eq!(info.ip_version, IpVersion::V6);
        assert_eq!(info.ipv4, None);
        assert_eq!(info.ipv6.as_deref(), Some("2001:db8::1"));
        assert_eq!(info.source, DetectionSource::Forwarded);
    }

    #[tokio::test]
    async fn test_fallback_is_invalid() {
        let info = IpDetector::default().detect(&HeaderMap::new(), false).await;

        assert_eq!(info.ip, FALLBACK_IP);
        assert_eq!(info.ip_version, IpVersion::Unknown);
        assert_eq!(info.source, DetectionSource::Fallback);
        assert_eq!(info.warnings.last().map(String::as_str), Some(DETECTION_WARNING));
        assert!(!is_valid_detection(&info));
    }

    #[tokio::test]
    async fn test_unparsable_header_degrades_to_fallback() {
        let detector = IpDetector::default();
        let cases = [
            ("x-real-ip", "garbage"),
            ("cf-connecting-ip", "999.1.1.1"),
            ("forwarded", "for=unknown"),
            ("forwarded", "for=_hidden;proto=https"),
        ];

        for (name, value) in cases {
            let info = detector.detect(&headers(&[(name, value)]), false).await;
            assert_eq!(info.ip, FALLBACK_IP, "{name}: {value}");
            assert_eq!(info.ip_version, IpVersion::Unknown, "{name}: {value}");
            assert_eq!(info.source, DetectionSource::Fallback, "{name}: {value}");
            assert_eq!(info.ipv4, None);
            assert!(!is_valid_detection(&info), "{name}: {value}");
        }
    }

    #[tokio::test]
    async fn test_valid_detection_accepts_non_public() {
        let detector = IpDetector::default();
        for ip in ["127.0.0.1", "169.254.3.3", "100.64.0.1", "0.0.0.0"] {
            let info = detector.detect(&headers(&[("x-real-ip", ip)]), false).await;
            assert!(is_valid_detection(&info), "{ip}");
        }
    }

    #[tokio::test]
    async fn test_request_info() {
        let info = IpDetector::default()
            .detect(
                &headers(&[
                    ("x-real-ip", "203.0.113.42"),
                    ("user-agent", "curl/8.5.0"),
                    ("accept-language", "de-DE,de;q=0.9,en;q=0.8"),
                    ("x-forwarded-proto", "https"),
                ]),
                false,
            )
            .await;

        assert_eq!(info.request.user_agent, "curl/8.5.0");
        assert_eq!(info.request.language, "de-DE");
        assert_eq!(info.request.protocol, Protocol::Https);

        let info = IpDetector::default()
            .detect(&headers(&[("x-forwarded-proto", "HTTPS")]), false)
            .await;
        assert_eq!(info.request.user_agent, "Unknown");
        assert_eq!(info.request.language, "Unknown");
        assert_eq!(info.request.protocol, Protocol::Http);
    }

    #[tokio::test]
    async fn test_geo_only_when_requested() {
        let stub = StubProvider::new(false);
        let detector = IpDetector::new(Some(stub.clone()));
        let map = headers(&[("cf-connecting-ip", "198.51.100.42")]);

        let info = detector.detect(&map, false).await;
        assert!(info.location.is_none());
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);

        let info = detector.detect(&map, true).await;
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            info.location.and_then(|l| l.city).as_deref(),
            Some("Amsterdam")
        );
        assert_eq!(info.isp.and_then(|i| i.asn).as_deref(), Some("AS64500"));
        assert!(info.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_geo_failure_degrades_to_warning() {
        let stub = StubProvider::new(true);
        let detector = IpDetector::new(Some(stub.clone()));

        let info = detector
            .detect(&headers(&[("cf-connecting-ip", "198.51.100.42")]), true)
            .await;

        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert!(info.location.is_none());
        assert!(info.isp.is_none());
        assert_eq!(info.warnings, vec![GEO_UNAVAILABLE_WARNING.to_string()]);
    }

    #[tokio::test]
    async fn test_geo_disabled_adds_no_warning() {
        let info = IpDetector::default()
            .detect(&headers(&[("cf-connecting-ip", "198.51.100.42")]), true)
            .await;

        assert!(info.location.is_none());
        assert!(info.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_geo_skipped_for_unparsable_address() {
        let stub = StubProvider::new(false);
        let detector = IpDetector::new(Some(stub.clone()));

        let info = detector
            .detect(&headers(&[("x-real-ip", "../../admin")]), true)
            .await;

        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            info.warnings.last().map(String::as_str),
            Some(GEO_UNAVAILABLE_WARNING)
        );
    }
}
