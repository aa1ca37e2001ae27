//! Compact binary object codec.
//!
//! Every record in the system — tokens, footprints — travels as a msgpack
//! map with short string keys and primitive leaves. The same encoding is
//! used inside the signed string form and for the persisted hash fields, so
//! a value must round-trip identically across process boundaries.
//!
//! The single byte `0xC0` (msgpack nil) doubles as the sentinel for "absent
//! footprint" and "absent token" in persistence: encoding `Option::None`
//! yields exactly [`NIL`], and decoding [`NIL`] into an `Option` yields
//! `None`.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// The encoded form of an absent value.
pub const NIL: [u8; 1] = [0xC0];

/// Errors from binary encoding or decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The value could not be encoded.
    #[error("encode failed: {reason}")]
    Encode { reason: String },

    /// The input was truncated or ill-shaped.
    #[error("decode failed: {reason}")]
    Decode { reason: String },
}

/// Encode a value to its binary object form.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if the value rejects encoding (e.g. an
/// audience entry containing NUL).
pub fn encode<T>(value: &T) -> Result<Vec<u8>, CodecError>
where
    T: Serialize + ?Sized,
{
    let mut buf = Vec::new();
    encode_into(&mut buf, value)?;
    Ok(buf)
}

/// Encode a value, appending to the given buffer.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if the value rejects encoding.
pub fn encode_into<T>(buf: &mut Vec<u8>, value: &T) -> Result<(), CodecError>
where
    T: Serialize + ?Sized,
{
    rmp_serde::encode::write_named(buf, value).map_err(|e| CodecError::Encode {
        reason: e.to_string(),
    })
}

/// Decode a value from its binary object form.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] on truncated or ill-shaped input.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode {
        reason: e.to_string(),
    })
}

/// Whether the given bytes are exactly the nil sentinel.
#[must_use]
pub fn is_nil(bytes: &[u8]) -> bool {
    bytes == NIL
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        #[serde(rename = "nam")]
        name: String,
        #[serde(rename = "cnt")]
        count: i64,
    }

    #[test]
    fn none_encodes_to_nil_sentinel() {
        let encoded = encode(&None::<Sample>).unwrap();
        assert_eq!(encoded, NIL);
        assert!(is_nil(&encoded));
    }

    #[test]
    fn nil_decodes_to_none() {
        let decoded: Option<Sample> = decode(&NIL).unwrap();
        assert_eq!(decoded, None);
    }

    #[test]
    fn record_roundtrip() {
        let sample = Sample {
            name: "auth".to_owned(),
            count: -42,
        };
        let encoded = encode(&sample).unwrap();
        let decoded: Sample = decode(&encoded).unwrap();
        assert_eq!(decoded, sample);
    }

    #[test]
    fn records_are_maps_with_short_keys() {
        let sample = Sample {
            name: "x".to_owned(),
            count: 1,
        };
        let encoded = encode(&sample).unwrap();
        // fixmap with 2 entries, first key the 3-char string "nam".
        assert_eq!(encoded[0], 0x82);
        assert_eq!(encoded[1], 0xA3);
        assert_eq!(&encoded[2..5], b"nam");
    }

    #[test]
    fn truncated_input_fails() {
        let sample = Sample {
            name: "auth".to_owned(),
            count: 7,
        };
        let encoded = encode(&sample).unwrap();
        let result: Result<Sample, _> = decode(&encoded[..encoded.len() - 1]);
        assert!(matches!(result, Err(CodecError::Decode { .. })));
    }

    #[test]
    fn empty_input_fails() {
        let result: Result<Option<Sample>, _> = decode(&[]);
        assert!(matches!(result, Err(CodecError::Decode { .. })));
    }

    #[test]
    fn encode_into_appends() {
        let mut buf = vec![0xFF];
        encode_into(&mut buf, &None::<Sample>).unwrap();
        assert_eq!(buf, vec![0xFF, 0xC0]);
    }
}
