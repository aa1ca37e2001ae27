//! Error types for the token store.
//!
//! Serializer construction and string-form failures live in
//! [`serializer::SerializerError`](crate::serializer::SerializerError);
//! everything the [`Store`](crate::Store) itself can fail with is here.

use tessera_storage::StorageError;

use crate::codec::CodecError;
use crate::serializer::SerializerError;

/// Error returned when one or more token fields fail validation.
///
/// Field checks run to completion and every failure is recorded, so a
/// single error value describes the whole token. The `expired` and
/// `not-before` conditions additionally set dedicated flags that callers
/// (e.g. the HTTP adapter) branch on.
#[derive(Debug, Clone, Default, thiserror::Error)]
#[error("invalid token")]
pub struct ValidationError {
    reasons: Vec<String>,
    expired: bool,
    not_before: bool,
}

impl ValidationError {
    pub(crate) fn push(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }

    pub(crate) fn mark_expired(&mut self) {
        self.expired = true;
    }

    pub(crate) fn mark_not_before(&mut self) {
        self.not_before = true;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.reasons.is_empty() && !self.expired && !self.not_before
    }

    /// Whether the token's expiry has elapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Whether the token was used before its not-before time.
    #[must_use]
    pub fn is_not_before(&self) -> bool {
        self.not_before
    }

    /// Human-readable descriptions of every failed field rule.
    #[must_use]
    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }
}

/// Errors returned by [`Store`](crate::Store) operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record exists for the token — it was never issued, expired out of
    /// the backend, or was revoked.
    #[error("token not registered; probably revoked")]
    Unregistered,

    /// The store has no storage backend attached.
    #[error("not connected to a storage backend")]
    NoBackend,

    /// The store has no serializer attached.
    #[error("no serializer available")]
    NoSerializer,

    /// The storage backend failed.
    #[error("backend error: {0}")]
    Backend(#[from] StorageError),

    /// The backend returned the wrong number of fields for a record.
    #[error("backend error: storage-map size mismatch")]
    MapSize,

    /// A record field held a value the store cannot interpret.
    #[error("backend error: cannot parse storage-map values")]
    MapValues,

    /// Binary encoding or decoding of a record failed.
    #[error("encoding/decoding error: {0}")]
    Codec(#[from] CodecError),

    /// The serializer rejected the string token.
    #[error(transparent)]
    Serializer(#[from] SerializerError),

    /// One or more token fields failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
