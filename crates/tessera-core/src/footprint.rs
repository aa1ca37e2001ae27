//! Footprints — requester metadata captured alongside a token.
//!
//! A [`Footprint`] records where a token was seen: the remote address, the
//! `Referer` and `Origin` headers, and the user agent broken into browser,
//! OS, and device records. The store captures one footprint when a token is
//! issued and refreshes a second one on every access.
//!
//! User-agent strings are parsed by a [`UaParser`] collaborator. The
//! [`UapParser`] implementation (feature `uap-parser`) wraps the uap-core
//! regex database; [`LiteralUaParser`] records the raw string and is the
//! default.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

/// Browser (or client application) identification, split per uap-core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAgent {
    pub family: String,
    pub major: String,
    pub minor: String,
    pub patch: String,
}

/// Operating system identification, split per uap-core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Os {
    pub family: String,
    pub major: String,
    pub minor: String,
    pub patch: String,
    pub patch_minor: String,
}

/// Hardware device identification, split per uap-core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Device {
    pub brand: String,
    pub family: String,
    pub model: String,
}

/// The outcome of parsing a user-agent string.
#[derive(Debug, Clone, Default)]
pub struct ParsedClient {
    pub user_agent: Option<UserAgent>,
    pub os: Option<Os>,
    pub device: Option<Device>,
}

/// A user-agent parsing collaborator.
pub trait UaParser: Send + Sync {
    /// Parse a non-empty user-agent string into its client records.
    fn parse(&self, user_agent: &str) -> ParsedClient;
}

/// Fallback parser that records the raw user-agent string as the browser
/// family and leaves OS and device unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralUaParser;

impl UaParser for LiteralUaParser {
    fn parse(&self, user_agent: &str) -> ParsedClient {
        ParsedClient {
            user_agent: Some(UserAgent {
                family: user_agent.to_owned(),
                ..UserAgent::default()
            }),
            os: None,
            device: None,
        }
    }
}

#[cfg(feature = "uap-parser")]
pub use self::uap::{UapLoadError, UapParser};

#[cfg(feature = "uap-parser")]
mod uap {
    use uaparser::Parser as _;

    use super::{Device, Os, ParsedClient, UaParser, UserAgent};

    /// UA parser backed by the uap-core regex database.
    pub struct UapParser(uaparser::UserAgentParser);

    /// Error loading the regex database.
    #[derive(Debug, thiserror::Error)]
    #[error("failed to load ua regexes from '{path}': {reason}")]
    pub struct UapLoadError {
        path: String,
        reason: String,
    }

    impl UapParser {
        /// Load the parser from a uap-core `regexes.yaml` file.
        ///
        /// # Errors
        ///
        /// Returns [`UapLoadError`] if the file is missing or malformed.
        pub fn from_yaml(path: &str) -> Result<Self, UapLoadError> {
            uaparser::UserAgentParser::from_yaml(path)
                .map(Self)
                .map_err(|e| UapLoadError {
                    path: path.to_owned(),
                    reason: e.to_string(),
                })
        }
    }

    impl UaParser for UapParser {
        fn parse(&self, user_agent: &str) -> ParsedClient {
            let client = self.0.parse(user_agent);
            ParsedClient {
                user_agent: Some(UserAgent {
                    family: client.user_agent.family.to_string(),
                    major: client.user_agent.major.unwrap_or_default().to_string(),
                    minor: client.user_agent.minor.unwrap_or_default().to_string(),
                    patch: client.user_agent.patch.unwrap_or_default().to_string(),
                }),
                os: Some(Os {
                    family: client.os.family.to_string(),
                    major: client.os.major.unwrap_or_default().to_string(),
                    minor: client.os.minor.unwrap_or_default().to_string(),
                    patch: client.os.patch.unwrap_or_default().to_string(),
                    patch_minor: client.os.patch_minor.unwrap_or_default().to_string(),
                }),
                device: Some(Device {
                    brand: client.device.brand.unwrap_or_default().to_string(),
                    family: client.device.family.to_string(),
                    model: client.device.model.unwrap_or_default().to_string(),
                }),
            }
        }
    }
}

/// The digital footprint of a token: the characteristics of the remote node
/// the token was issued for or last accessed by.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Footprint {
    /// Seconds since the Unix epoch at capture time.
    pub timestamp: i64,
    /// Parsed remote IP address, when one was supplied and parseable.
    pub remote_addr: Option<IpAddr>,
    pub referer: String,
    pub origin: String,
    pub user_agent: Option<UserAgent>,
    pub os: Option<Os>,
    pub device: Option<Device>,
}

impl Footprint {
    /// Build a footprint from request parts.
    ///
    /// A zero `timestamp` means "now". A non-empty `remote_addr` that is
    /// not an IPv4 or IPv6 literal discards the whole footprint. A
    /// non-empty `user_agent` is handed to the parsing collaborator.
    #[must_use]
    pub fn build(
        timestamp: i64,
        remote_addr: &str,
        referer: &str,
        origin: &str,
        user_agent: &str,
        parser: &dyn UaParser,
    ) -> Option<Self> {
        let mut fp = Self {
            timestamp: if timestamp == 0 {
                chrono::Utc::now().timestamp()
            } else {
                timestamp
            },
            remote_addr: None,
            referer: referer.to_owned(),
            origin: origin.to_owned(),
            user_agent: None,
            os: None,
            device: None,
        };

        if !remote_addr.is_empty() {
            fp.remote_addr = Some(remote_addr.parse().ok()?);
        }

        if !user_agent.is_empty() {
            let parsed = parser.parse(user_agent);
            fp.user_agent = parsed.user_agent;
            fp.os = parsed.os;
            fp.device = parsed.device;
        }

        Some(fp)
    }

    fn to_record(&self) -> FootprintRecord {
        FootprintRecord {
            timestamp: self.timestamp,
            remote_addr: match self.remote_addr {
                Some(IpAddr::V4(ip)) => ip.octets().to_vec(),
                Some(IpAddr::V6(ip)) => ip.octets().to_vec(),
                None => Vec::new(),
            },
            referer: self.referer.clone(),
            origin: self.origin.clone(),
            user_agent: self.user_agent.as_ref().map(join_user_agent).unwrap_or_default(),
            os: self.os.as_ref().map(join_os).unwrap_or_default(),
            device: self.device.as_ref().map(join_device).unwrap_or_default(),
        }
    }

    fn from_record(record: FootprintRecord) -> Self {
        let remote_addr = match record.remote_addr.len() {
            4 => <[u8; 4]>::try_from(record.remote_addr.as_slice())
                .ok()
                .map(|b| IpAddr::V4(Ipv4Addr::from(b))),
            16 => <[u8; 16]>::try_from(record.remote_addr.as_slice())
                .ok()
                .map(|b| IpAddr::V6(Ipv6Addr::from(b))),
            _ => None,
        };

        let user_agent = (!record.user_agent.is_empty()).then(|| {
            let [family, major, minor, patch] = split_fields(&record.user_agent);
            UserAgent {
                family,
                major,
                minor,
                patch,
            }
        });

        let os = (!record.os.is_empty()).then(|| {
            let [family, major, minor, patch, patch_minor] = split_fields(&record.os);
            Os {
                family,
                major,
                minor,
                patch,
                patch_minor,
            }
        });

        let device = (!record.device.is_empty()).then(|| {
            let [brand, family, model] = split_fields(&record.device);
            Device {
                brand,
                family,
                model,
            }
        });

        Self {
            timestamp: record.timestamp,
            remote_addr,
            referer: record.referer,
            origin: record.origin,
            user_agent,
            os,
            device,
        }
    }
}

impl Serialize for Footprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_record().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Footprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        FootprintRecord::deserialize(deserializer).map(Self::from_record)
    }
}

/// Wire form of a footprint: structured sub-records flattened to NUL-joined
/// strings to keep the encoding compact.
#[derive(Debug, Default, Serialize, Deserialize)]
struct FootprintRecord {
    #[serde(rename = "tsp", skip_serializing_if = "is_zero", default)]
    timestamp: i64,
    #[serde(
        rename = "adr",
        with = "serde_bytes",
        skip_serializing_if = "Vec::is_empty",
        default
    )]
    remote_addr: Vec<u8>,
    #[serde(rename = "ref", skip_serializing_if = "String::is_empty", default)]
    referer: String,
    #[serde(rename = "org", skip_serializing_if = "String::is_empty", default)]
    origin: String,
    #[serde(rename = "uag", skip_serializing_if = "String::is_empty", default)]
    user_agent: String,
    #[serde(rename = "uos", skip_serializing_if = "String::is_empty", default)]
    os: String,
    #[serde(rename = "udv", skip_serializing_if = "String::is_empty", default)]
    device: String,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

fn join_user_agent(ua: &UserAgent) -> String {
    [
        ua.family.as_str(),
        ua.major.as_str(),
        ua.minor.as_str(),
        ua.patch.as_str(),
    ]
    .join("\0")
}

fn join_os(os: &Os) -> String {
    [
        os.family.as_str(),
        os.major.as_str(),
        os.minor.as_str(),
        os.patch.as_str(),
        os.patch_minor.as_str(),
    ]
    .join("\0")
}

fn join_device(device: &Device) -> String {
    [
        device.brand.as_str(),
        device.family.as_str(),
        device.model.as_str(),
    ]
    .join("\0")
}

/// Split a NUL-joined field list into exactly `N` fields; surplus parts are
/// dropped and missing parts stay empty.
fn split_fields<const N: usize>(s: &str) -> [String; N] {
    let mut out: [String; N] = std::array::from_fn(|_| String::new());
    for (slot, part) in out.iter_mut().zip(s.split('\0')) {
        *slot = part.to_owned();
    }
    out
}

#[cfg(test)]
mod tests {
    use crate::codec;

    use super::*;

    #[test]
    fn zero_timestamp_defaults_to_now() {
        let before = chrono::Utc::now().timestamp();
        let fp = Footprint::build(0, "", "r", "", "", &LiteralUaParser).unwrap();
        assert!(fp.timestamp >= before);
    }

    #[test]
    fn explicit_timestamp_is_kept() {
        let fp = Footprint::build(1234, "", "r", "", "", &LiteralUaParser).unwrap();
        assert_eq!(fp.timestamp, 1234);
    }

    #[test]
    fn unparseable_address_discards_footprint() {
        let fp = Footprint::build(0, "not-an-ip", "r", "o", "ua", &LiteralUaParser);
        assert!(fp.is_none());
    }

    #[test]
    fn ipv4_and_ipv6_addresses_parse() {
        let v4 = Footprint::build(0, "1.2.3.4", "", "", "", &LiteralUaParser).unwrap();
        assert_eq!(v4.remote_addr, Some("1.2.3.4".parse().unwrap()));

        let v6 = Footprint::build(0, "::1", "", "", "", &LiteralUaParser).unwrap();
        assert_eq!(v6.remote_addr, Some("::1".parse().unwrap()));
    }

    #[test]
    fn user_agent_goes_through_parser() {
        let fp = Footprint::build(0, "", "", "", "Mozilla/5.0", &LiteralUaParser).unwrap();
        assert_eq!(fp.user_agent.unwrap().family, "Mozilla/5.0");
        assert_eq!(fp.os, None);
        assert_eq!(fp.device, None);
    }

    fn full_footprint() -> Footprint {
        Footprint {
            timestamp: 1_700_000_000,
            remote_addr: Some("10.0.0.7".parse().unwrap()),
            referer: "https://app.example.org".to_owned(),
            origin: "https://app.example.org".to_owned(),
            user_agent: Some(UserAgent {
                family: "Firefox".to_owned(),
                major: "121".to_owned(),
                minor: "0".to_owned(),
                patch: String::new(),
            }),
            os: Some(Os {
                family: "Linux".to_owned(),
                major: String::new(),
                minor: String::new(),
                patch: String::new(),
                patch_minor: String::new(),
            }),
            device: Some(Device {
                brand: String::new(),
                family: "Other".to_owned(),
                model: String::new(),
            }),
        }
    }

    #[test]
    fn record_roundtrip() {
        let fp = full_footprint();
        let encoded = codec::encode(&fp).unwrap();
        let decoded: Footprint = codec::decode(&encoded).unwrap();
        assert_eq!(decoded, fp);
    }

    #[test]
    fn optional_footprint_roundtrip() {
        let encoded = codec::encode(&None::<Footprint>).unwrap();
        assert_eq!(encoded, codec::NIL);
        let decoded: Option<Footprint> = codec::decode(&encoded).unwrap();
        assert_eq!(decoded, None);

        let fp = full_footprint();
        let encoded = codec::encode(&Some(fp.clone())).unwrap();
        let decoded: Option<Footprint> = codec::decode(&encoded).unwrap();
        assert_eq!(decoded, Some(fp));
    }

    #[test]
    fn ipv6_survives_roundtrip_as_sixteen_bytes() {
        let fp = Footprint {
            remote_addr: Some("2001:db8::1".parse().unwrap()),
            ..Footprint::default()
        };
        let encoded = codec::encode(&fp).unwrap();
        let decoded: Footprint = codec::decode(&encoded).unwrap();
        assert_eq!(decoded.remote_addr, fp.remote_addr);
    }

    #[test]
    fn malformed_address_bytes_decode_as_absent() {
        let record = FootprintRecord {
            remote_addr: vec![1, 2, 3],
            ..FootprintRecord::default()
        };
        let encoded = codec::encode(&record).unwrap();
        let decoded: Footprint = codec::decode(&encoded).unwrap();
        assert_eq!(decoded.remote_addr, None);
    }

    #[test]
    fn surplus_field_parts_are_dropped() {
        let [a, b] = split_fields::<2>("x\0y\0z");
        assert_eq!((a.as_str(), b.as_str()), ("x", "y"));

        let [c, d, e] = split_fields::<3>("only");
        assert_eq!((c.as_str(), d.as_str(), e.as_str()), ("only", "", ""));
    }
}
