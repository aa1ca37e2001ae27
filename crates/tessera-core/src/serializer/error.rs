//! Serializer error types.

use crate::codec::CodecError;

/// Errors raised while constructing or using a
/// [`Serializer`](super::Serializer).
#[derive(Debug, thiserror::Error)]
pub enum SerializerError {
    /// The string token does not match the expected format: missing
    /// header, wrong segment count, or corrupt base64.
    #[error("cannot deserialize, malformed input")]
    BadFormat,

    /// The signature segment does not match the payload.
    #[error("invalid signature")]
    BadSign,

    /// No usable hash was supplied for the sign method.
    #[error("hash not available for {method}")]
    BadHash { method: &'static str },

    /// The supplied key does not match the sign method.
    #[error("wrong key type; expect {expected}")]
    BadKeyType { expected: &'static str },

    /// The supplied key is too short for safe use.
    #[error("key length too short; expect min. {min}")]
    BadKeyLen { min: &'static str },

    /// The supplied key failed its own consistency checks.
    #[error("invalid key: {reason}")]
    BadKey { reason: String },

    /// Internal dispatch reached a method/key combination that a
    /// well-constructed serializer cannot produce.
    #[error("(internal) sign method not available")]
    BadMethod,

    /// The signing primitive itself failed.
    #[error("signing failed: {reason}")]
    Sign { reason: String },

    /// The binary payload could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}
