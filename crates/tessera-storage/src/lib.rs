//! Storage backend abstraction for Tessera.
//!
//! This crate defines the [`StorageBackend`] trait — a key-value interface
//! with Redis-style hash and scan semantics that knows nothing about tokens
//! or signatures. The token store in `tessera-core` maps each issued token
//! to one hash record behind this trait.
//!
//! Two implementations are provided:
//!
//! - [`RedisBackend`] — production default, any server speaking the Redis
//!   protocol (feature `redis-backend`)
//! - [`MemoryBackend`] — in-memory, for testing only

mod error;
mod memory;
#[cfg(feature = "redis-backend")]
mod redis_backend;

pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "redis-backend")]
pub use redis_backend::RedisBackend;

use futures::stream::BoxStream;

/// A stream of keys produced by [`StorageBackend::scan`].
///
/// Cursor failures surface as an `Err` item mid-stream.
pub type KeyStream = BoxStream<'static, Result<String, StorageError>>;

/// A pluggable key-value storage backend with hash-record semantics.
///
/// Keys are UTF-8 strings; each key maps to a small hash of named fields
/// holding opaque byte values. A key may carry an absolute expiry time
/// (seconds since the Unix epoch) after which it reads as absent.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Set the given fields on the hash at `key`, creating it if absent,
    /// and optionally set an absolute expiry time.
    ///
    /// The field writes and the expiry must be applied as one atomic unit
    /// where the backend offers a combining primitive (pipeline or
    /// transaction). Fields not mentioned keep their current values; an
    /// absent `expire_at` leaves any existing expiry untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Command`] if the backend fails.
    async fn put_fields(
        &self,
        key: &str,
        fields: &[(&str, Vec<u8>)],
        expire_at: Option<i64>,
    ) -> Result<(), StorageError>;

    /// Fetch multiple fields from the hash at `key`.
    ///
    /// The returned vector has one entry per requested field, in request
    /// order; `None` marks a field (or key) that does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Command`] if the backend fails.
    async fn get_fields(
        &self,
        key: &str,
        fields: &[&str],
    ) -> Result<Vec<Option<Vec<u8>>>, StorageError>;

    /// Fetch a single field from the hash at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Command`] if the backend fails.
    async fn get_field(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Set a single field on the hash at `key`, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Command`] if the backend fails.
    async fn put_field(&self, key: &str, field: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Check whether `key` exists (and has not expired).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Command`] if the backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Delete `key`, returning the number of keys removed (0 or 1).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Command`] if the backend fails.
    async fn delete(&self, key: &str) -> Result<u64, StorageError>;

    /// Scan for keys matching a glob `pattern`, fetching `page_size` keys
    /// per cursor round-trip.
    ///
    /// The stream yields keys in no particular order and may yield an `Err`
    /// mid-stream if a cursor round-trip fails.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Scan`] if the scan cannot be started.
    async fn scan(&self, pattern: &str, page_size: u64) -> Result<KeyStream, StorageError>;
}
