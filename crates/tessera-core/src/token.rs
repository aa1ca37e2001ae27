//! The token model.
//!
//! A [`Token`] is the payload minted by a [`Store`](crate::Store) and
//! carried between services to authorize access for a principal. Its wire
//! form is the binary record described in [`codec`](crate::codec); the two
//! footprints never travel in the string form — they live only in the
//! backend record.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::footprint::Footprint;

/// Timestamp comparisons tolerate this many seconds of clock drift between
/// issuer and verifier, in both directions.
pub(crate) const SKEW_SECS: i64 = 5;

/// A bearer authorization token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Token {
    /// Identifies this token. Generated randomly at issue; the zero UUID
    /// means "unset" and never validates.
    pub id: Uuid,
    /// Identifies the principal the token was issued to.
    pub subject: Uuid,
    /// The store that minted the token, as a URI-shaped string.
    pub issuer: String,
    /// The services the token is intended for. Entries must not contain
    /// NUL — the wire form joins them on it.
    pub audience: Vec<String>,
    /// Seconds since the Unix epoch; zero means "unset" for `not_before`
    /// and `expires`.
    pub issued: i64,
    pub not_before: i64,
    pub expires: i64,

    // Footprints at issue time and at the latest access. Populated by the
    // store, not part of the transported payload.
    pub(crate) fpi: Option<Footprint>,
    pub(crate) fpc: Option<Footprint>,
}

impl Token {
    /// Construct a new token with a fresh random id, issued now.
    ///
    /// A zero `exp` leaves the token without an expiry.
    #[must_use]
    pub fn new(subject: Uuid, issuer: impl Into<String>, audience: Vec<String>, exp: Duration) -> Self {
        let now = Utc::now().timestamp();
        let mut token = Self {
            id: Uuid::new_v4(),
            subject,
            issuer: issuer.into(),
            audience,
            issued: now,
            ..Self::default()
        };

        if !exp.is_zero() {
            token.expires = now + exp.num_seconds();
        }

        token
    }

    /// The footprints captured when the token was issued and when it was
    /// last verified by a store, in that order.
    #[must_use]
    pub fn footprints(&self) -> (Option<&Footprint>, Option<&Footprint>) {
        (self.fpi.as_ref(), self.fpc.as_ref())
    }

    /// Validate the token's fields, accumulating every failure.
    ///
    /// The not-before rule is only applied when `check_not_before` is set —
    /// issuing skips it, access enforces it. All timestamp comparisons use
    /// a ±5 second skew window.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] describing every failed rule.
    pub fn validate(&self, check_not_before: bool) -> Result<(), ValidationError> {
        let now = Utc::now().timestamp();
        let mut err = ValidationError::default();

        if self.id.is_nil() {
            err.push("token id is unset (zero-UUID)");
        }

        if self.subject.is_nil() {
            err.push("token subject is unset (zero-UUID)");
        }

        if self.issued == 0 {
            err.push("token issued timestamp is unset");
        } else if self.issued > now {
            err.push("token issued timestamp is in the future");
        }

        if self.expires != 0 && self.expires < now + SKEW_SECS {
            err.push(format!("token expired at {}", self.expires));
            err.mark_expired();
        }

        if check_not_before && self.not_before != 0 && self.not_before > now - SKEW_SECS {
            err.push(format!("token not valid before {}", self.not_before));
            err.mark_not_before();
        }

        if err.is_empty() {
            Ok(())
        } else {
            Err(err)
        }
    }

    fn to_record(&self) -> TokenRecord {
        TokenRecord {
            id: uuid_bytes(self.id),
            subject: uuid_bytes(self.subject),
            issuer: self.issuer.clone(),
            audience: self.audience.join("\0"),
            issued: self.issued,
            not_before: self.not_before,
            expires: self.expires,
        }
    }

    fn from_record(record: TokenRecord) -> Self {
        let mut token = Self {
            issuer: record.issuer,
            issued: record.issued,
            not_before: record.not_before,
            expires: record.expires,
            ..Self::default()
        };

        if !record.audience.is_empty() {
            token.audience = record.audience.split('\0').map(str::to_owned).collect();
        }

        // Anything but exactly 16 bytes leaves the id unset.
        if let Ok(bytes) = <[u8; 16]>::try_from(record.id.as_slice()) {
            token.id = Uuid::from_bytes(bytes);
        }
        if let Ok(bytes) = <[u8; 16]>::try_from(record.subject.as_slice()) {
            token.subject = Uuid::from_bytes(bytes);
        }

        token
    }
}

impl Serialize for Token {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::Error as _;

        if self.audience.iter().any(|a| a.contains('\0')) {
            return Err(S::Error::custom("audience entry contains NUL"));
        }
        self.to_record().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Token {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        TokenRecord::deserialize(deserializer).map(Self::from_record)
    }
}

fn uuid_bytes(id: Uuid) -> Vec<u8> {
    if id.is_nil() {
        Vec::new()
    } else {
        id.as_bytes().to_vec()
    }
}

/// Wire form of a token. The audience list travels as one NUL-joined
/// string; unset ids and zero timestamps are omitted.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenRecord {
    #[serde(
        rename = "tid",
        with = "serde_bytes",
        skip_serializing_if = "Vec::is_empty",
        default
    )]
    id: Vec<u8>,
    #[serde(
        rename = "sub",
        with = "serde_bytes",
        skip_serializing_if = "Vec::is_empty",
        default
    )]
    subject: Vec<u8>,
    #[serde(rename = "iss", skip_serializing_if = "String::is_empty", default)]
    issuer: String,
    #[serde(rename = "aud", skip_serializing_if = "String::is_empty", default)]
    audience: String,
    #[serde(rename = "iat")]
    issued: i64,
    #[serde(rename = "nbf", skip_serializing_if = "is_zero", default)]
    not_before: i64,
    #[serde(rename = "exp", skip_serializing_if = "is_zero", default)]
    expires: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}
