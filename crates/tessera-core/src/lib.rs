//! Token lifecycle engine for Tessera.
//!
//! A [`Store`] issues, verifies, lists, and revokes bearer authorization
//! tokens. Every issued token exists in two forms: a compact signed string
//! handed to the client (`auth.<payload>.<signature>`), and a server-side
//! hash record in a Redis-style backend holding the token bytes plus two
//! "footprints" — the requester metadata captured at issue time and at the
//! most recent access.
//!
//! The string form is produced by a [`Serializer`], polymorphic over the
//! sign method (none, HMAC, RSA PKCS#1 v1.5, RSA-PSS, ECDSA). The signature
//! is computed over the raw binary payload, not its base64 form — this is
//! deliberately not a JWT and not wire-compatible with RFC 7519.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use tessera_core::{SignMethod, Store};
//! # use tessera_storage::MemoryBackend;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = Store::new(Some(Arc::new(MemoryBackend::new())), None);
//! store.use_serializer(SignMethod::None, None, None)?;
//!
//! let subject = uuid::Uuid::new_v4();
//! let s = store
//!     .issue(subject, chrono::Duration::zero(), "1.2.3.4", "", "", "")
//!     .await?;
//! let token = store.access(&s, "1.2.3.4", "", "", "").await?;
//! assert_eq!(token.subject, subject);
//! # Ok(())
//! # }
//! ```

pub mod codec;
mod error;
pub mod footprint;
mod pool;
pub mod serializer;
mod store;
mod token;

pub use error::{StoreError, ValidationError};
pub use footprint::{Footprint, UaParser};
pub use serializer::{HashAlg, Serializer, SerializerError, SignKey, SignMethod};
pub use store::Store;
pub use token::Token;
