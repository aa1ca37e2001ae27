//! The token store.
//!
//! A [`Store`] issues, verifies, lists, and revokes tokens. It needs two
//! collaborators: a storage backend implementing Redis-style hash commands
//! (see `tessera-storage`) for the server-side record of every issued
//! token, and a [`Serializer`] for the string form handed to clients.
//! Either may be attached after construction; operations fail with
//! [`StoreError::NoBackend`] / [`StoreError::NoSerializer`] until then.
//!
//! Each token maps to one hash record under the key
//! `[namespace ":"] b64u(subject) ":" b64u(id)` with three fields: `_` (the
//! token bytes), `I` (the footprint captured at issue), and `C` (the
//! footprint captured at the latest access). Deleting the record is the
//! canonical revocation; record expiry is the token's expiry plus a skew
//! window.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::LazyLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Duration;
use futures::StreamExt as _;
use rand::RngCore as _;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

#[cfg(feature = "redis-backend")]
use tessera_storage::RedisBackend;
use tessera_storage::StorageBackend;

use crate::codec;
use crate::error::StoreError;
use crate::footprint::{Footprint, LiteralUaParser, UaParser};
use crate::pool::ENCODE_BUFFERS;
use crate::serializer::{HashAlg, Serializer, SignKey, SignMethod};
use crate::token::{Token, SKEW_SECS};

/// Record field names: token, issue footprint, current footprint.
const FIELD_TOKEN: &str = "_";
const FIELD_FPI: &str = "I";
const FIELD_FPC: &str = "C";
const RECORD_FIELDS: [&str; 3] = [FIELD_TOKEN, FIELD_FPI, FIELD_FPC];

/// Keys fetched per scan round-trip during [`Store::list`].
const SCAN_PAGE: u64 = 10;

/// Capacity of the error channel used by [`Store::list`].
const LIST_ERR_CAP: usize = 16;

/// z-base-32, used for the random namespace suffix.
static ZBASE32: LazyLock<data_encoding::Encoding> = LazyLock::new(|| {
    let mut spec = data_encoding::Specification::new();
    spec.symbols.push_str("ybndrfg8ejkmcpqxot1uwisza345h769");
    spec.encoding().expect("z-base-32 is a valid encoding specification")
});

fn random_namespace() -> String {
    let mut suffix = [0u8; 5];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!("store-{}", ZBASE32.encode(&suffix))
}

/// Issues, verifies, lists, and revokes bearer authorization tokens.
///
/// A store can be shared freely across tasks: it is `Clone`, and no
/// operation takes a lock on the store itself. Concurrent accesses to the
/// same token are last-writer-wins on the current-footprint field.
#[derive(Clone)]
pub struct Store {
    backend: Option<Arc<dyn StorageBackend>>,
    serializer: Option<Arc<Serializer>>,
    ua_parser: Arc<dyn UaParser>,

    /// Prefixed to every storage key, preventing collisions between stores
    /// sharing one backend. Defaults to `store-` plus eight random
    /// z-base-32 characters.
    pub namespace: String,

    /// Identifies this store; stamped on every issued token when non-empty.
    pub issuer: String,

    /// The services issued tokens are intended for.
    pub audience: Vec<String>,

    /// Expiry applied when [`Store::issue`] is called with a zero duration.
    /// Defaults to 72 hours.
    pub default_exp: Duration,
}

impl Store {
    /// Construct a store. Both collaborators may be `None` and attached
    /// later via [`Store::connect_backend`] / [`Store::use_serializer`].
    #[must_use]
    pub fn new(backend: Option<Arc<dyn StorageBackend>>, serializer: Option<Serializer>) -> Self {
        Self {
            backend,
            serializer: serializer.map(Arc::new),
            ua_parser: Arc::new(LiteralUaParser),
            namespace: random_namespace(),
            issuer: String::new(),
            audience: Vec::new(),
            default_exp: Duration::hours(72),
        }
    }

    /// Replace the UA-parsing collaborator used when building footprints.
    #[must_use]
    pub fn with_ua_parser(mut self, parser: Arc<dyn UaParser>) -> Self {
        self.ua_parser = parser;
        self
    }

    /// Connect to a Redis-protocol server at `url` and attach it as the
    /// storage backend.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the connection cannot be
    /// established.
    #[cfg(feature = "redis-backend")]
    pub async fn connect_backend(&mut self, url: &str) -> Result<(), StoreError> {
        let backend = RedisBackend::connect(url).await?;
        self.backend = Some(Arc::new(backend));
        Ok(())
    }

    /// Build a [`Serializer`] from the given parameters and attach it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serializer`] if the key or hash is unusable
    /// for the method.
    pub fn use_serializer(
        &mut self,
        method: SignMethod,
        key: Option<SignKey>,
        hash: Option<HashAlg>,
    ) -> Result<(), StoreError> {
        self.serializer = Some(Arc::new(Serializer::new(method, key, hash)?));
        Ok(())
    }

    /// Whether a storage backend is attached.
    #[must_use]
    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Whether a serializer is attached.
    #[must_use]
    pub fn has_serializer(&self) -> bool {
        self.serializer.is_some()
    }

    fn backend(&self) -> Result<&Arc<dyn StorageBackend>, StoreError> {
        self.backend.as_ref().ok_or(StoreError::NoBackend)
    }

    fn serializer(&self) -> Result<&Arc<Serializer>, StoreError> {
        self.serializer.as_ref().ok_or(StoreError::NoSerializer)
    }

    /// Issue a new token for `subject` and register it with the backend,
    /// returning the string form for the client to present as a bearer
    /// token.
    ///
    /// A zero `exp` applies [`Store::default_exp`]; exactly −1 second means
    /// "no expiry". When any of the four footprint inputs is non-empty,
    /// the issue footprint is captured from them.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::Validation`] if the constructed token is
    /// invalid (e.g. a zero subject), or with serializer/backend errors.
    pub async fn issue(
        &self,
        subject: Uuid,
        exp: Duration,
        remote_addr: &str,
        referer: &str,
        origin: &str,
        user_agent: &str,
    ) -> Result<String, StoreError> {
        let serializer = self.serializer()?;

        let mut exp = exp;
        if exp.is_zero() {
            exp = self.default_exp;
        }
        if exp == Duration::seconds(-1) {
            exp = Duration::zero();
        }

        let mut token = Token::new(subject, self.issuer.clone(), self.audience.clone(), exp);
        if [remote_addr, referer, origin, user_agent]
            .iter()
            .any(|s| !s.is_empty())
        {
            token.fpi = Footprint::build(
                0,
                remote_addr,
                referer,
                origin,
                user_agent,
                self.ua_parser.as_ref(),
            );
        }

        let s = serializer.serialize(&token)?;
        self.register(&token).await?;

        info!(subject = %token.subject, id = %token.id, "token issued");
        Ok(s)
    }

    /// Verify that the string token `s` is valid and was issued by this
    /// store, returning the reconstructed token.
    ///
    /// The issue footprint is read back from the record into the returned
    /// token; the current footprint is rebuilt from the four inputs (all
    /// empty ⇒ none) and written back to the record. An absent record means
    /// the token was revoked or never issued.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Serializer`] if the string form or signature is bad.
    /// - [`StoreError::Validation`] if a field rule fails (incl. expiry and
    ///   not-before).
    /// - [`StoreError::Unregistered`] if no record exists.
    pub async fn access(
        &self,
        s: &str,
        remote_addr: &str,
        referer: &str,
        origin: &str,
        user_agent: &str,
    ) -> Result<Token, StoreError> {
        let serializer = self.serializer()?;
        let mut token: Token = serializer.deserialize(s).await?;

        if [remote_addr, referer, origin, user_agent]
            .iter()
            .any(|v| !v.is_empty())
        {
            token.fpc = Footprint::build(
                0,
                remote_addr,
                referer,
                origin,
                user_agent,
                self.ua_parser.as_ref(),
            );
        }

        self.touch(&mut token).await?;
        Ok(token)
    }

    /// Revoke a token so it can no longer authorize anything.
    ///
    /// Removes the token's record; a subsequent [`Store::access`] with the
    /// matching string token returns [`StoreError::Unregistered`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unregistered`] if the record is already gone.
    pub async fn revoke(&self, token: &Token) -> Result<(), StoreError> {
        let backend = self.backend()?;

        let key = self.storage_key(Some(token), false);
        if !backend.exists(&key).await? {
            return Err(StoreError::Unregistered);
        }
        backend.delete(&key).await?;

        debug!(subject = %token.subject, id = %token.id, "token revoked");
        Ok(())
    }

    /// Revoke every token in `tokens` concurrently.
    ///
    /// Returns the number of records actually deleted together with the
    /// first error observed, if any. [`StoreError::Unregistered`] from an
    /// individual revocation is skipped silently and does not count. The
    /// dispatch loop stops at the first posted error; tasks already
    /// spawned run to completion detached.
    pub async fn revoke_many(&self, tokens: &[Token]) -> (usize, Option<StoreError>) {
        if self.backend.is_none() {
            return (0, Some(StoreError::NoBackend));
        }
        if tokens.is_empty() {
            return (0, None);
        }

        let revoked = Arc::new(AtomicUsize::new(0));
        let (err_tx, mut err_rx) = mpsc::channel::<StoreError>(tokens.len());
        let mut handles = Vec::with_capacity(tokens.len());

        for token in tokens {
            if let Ok(err) = err_rx.try_recv() {
                return (revoked.load(Ordering::SeqCst), Some(err));
            }

            let store = self.clone();
            let token = token.clone();
            let revoked = Arc::clone(&revoked);
            let err_tx = err_tx.clone();
            handles.push(tokio::spawn(async move {
                match store.revoke(&token).await {
                    Ok(()) => {
                        revoked.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(StoreError::Unregistered) => {}
                    Err(err) => {
                        let _ = err_tx.try_send(err);
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        let err = err_rx.try_recv().ok();
        (revoked.load(Ordering::SeqCst), err)
    }

    /// List every registered token sharing the given template's subject.
    ///
    /// Only the template's `subject` is used; records are found by a
    /// pattern scan and decoded concurrently, one task per hit. On any
    /// failure the first error is returned and partial results are
    /// discarded.
    ///
    /// # Errors
    ///
    /// Returns backend or codec errors from the scan and decode tasks.
    pub async fn list(&self, template: &Token) -> Result<Vec<Token>, StoreError> {
        let backend = self.backend()?;
        let pattern = self.storage_key(Some(template), true);

        let mut keys = backend.scan(&pattern, SCAN_PAGE).await?;
        let results = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let (err_tx, mut err_rx) = mpsc::channel::<StoreError>(LIST_ERR_CAP);
        let mut handles = Vec::new();

        while let Some(key) = keys.next().await {
            if let Ok(err) = err_rx.try_recv() {
                return Err(err);
            }
            let key = key?;

            let backend = Arc::clone(backend);
            let results = Arc::clone(&results);
            let err_tx = err_tx.clone();
            handles.push(tokio::spawn(async move {
                match Self::retrieve(backend.as_ref(), &key).await {
                    Ok(Some(token)) => results.lock().await.push(token),
                    Ok(None) => {}
                    Err(err) => {
                        let _ = err_tx.try_send(err);
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        if let Ok(err) = err_rx.try_recv() {
            return Err(err);
        }

        let mut results = results.lock().await;
        Ok(std::mem::take(&mut *results))
    }

    /// The storage key identifying `token` in the backend; the catch-all
    /// form substitutes `*` for the id segment to drive a pattern scan.
    /// An absent token yields the empty string.
    #[must_use]
    pub fn storage_key(&self, token: Option<&Token>, catch_all: bool) -> String {
        let Some(token) = token else {
            return String::new();
        };

        let mut key = String::new();
        if !self.namespace.is_empty() {
            key.push_str(&self.namespace);
            key.push(':');
        }

        URL_SAFE_NO_PAD.encode_string(token.subject.as_bytes(), &mut key);
        key.push(':');

        if catch_all {
            key.push('*');
        } else {
            URL_SAFE_NO_PAD.encode_string(token.id.as_bytes(), &mut key);
        }

        key
    }

    /// Validate and write the record for a freshly issued token.
    async fn register(&self, token: &Token) -> Result<(), StoreError> {
        token.validate(false)?;
        let backend = self.backend()?;

        let (tk, fpi, fpc) = Self::encode_record(Some(token))?;
        let key = self.storage_key(Some(token), false);
        let expire_at = (token.expires != 0).then(|| token.expires + SKEW_SECS);

        backend
            .put_fields(
                &key,
                &[(FIELD_TOKEN, tk), (FIELD_FPI, fpi), (FIELD_FPC, fpc)],
                expire_at,
            )
            .await?;
        Ok(())
    }

    /// Validate an accessed token, read its issue footprint back from the
    /// record, and persist its fresh current footprint.
    async fn touch(&self, token: &mut Token) -> Result<(), StoreError> {
        token.validate(true)?;
        let backend = self.backend()?;

        let key = self.storage_key(Some(token), false);
        if !backend.exists(&key).await? {
            return Err(StoreError::Unregistered);
        }

        let fpi = backend.get_field(&key, FIELD_FPI).await?;
        let Some(fpi) = fpi.filter(|b| !b.is_empty()) else {
            return Err(StoreError::MapValues);
        };
        token.fpi = codec::decode(&fpi)?;

        let fpc = codec::encode(&token.fpc)?;
        backend.put_field(&key, FIELD_FPC, fpc).await?;
        Ok(())
    }

    /// Read a record by key and reconstruct the token, both footprints
    /// included. A record with any field missing was deleted (or expired)
    /// mid-scan and reads as absent.
    async fn retrieve(
        backend: &dyn StorageBackend,
        key: &str,
    ) -> Result<Option<Token>, StoreError> {
        let values = backend.get_fields(key, &RECORD_FIELDS).await?;
        if values.len() != RECORD_FIELDS.len() {
            return Err(StoreError::MapSize);
        }

        let mut fields = values.into_iter();
        let (Some(tk), Some(fpi), Some(fpc)) = (
            fields.next().flatten(),
            fields.next().flatten(),
            fields.next().flatten(),
        ) else {
            return Ok(None);
        };

        Self::decode_record(&tk, &fpi, &fpc)
    }

    /// Encode a token and its two footprints into the three record fields.
    /// An absent token encodes as three nil sentinels.
    fn encode_record(token: Option<&Token>) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), StoreError> {
        let Some(token) = token else {
            return Ok((
                codec::NIL.to_vec(),
                codec::NIL.to_vec(),
                codec::NIL.to_vec(),
            ));
        };

        let mut buf = ENCODE_BUFFERS.acquire();
        codec::encode_into(&mut buf, token)?;
        let tk = buf.to_vec();

        buf.clear();
        codec::encode_into(&mut buf, &token.fpi)?;
        let fpi = buf.to_vec();

        buf.clear();
        codec::encode_into(&mut buf, &token.fpc)?;
        let fpc = buf.to_vec();

        Ok((tk, fpi, fpc))
    }

    /// Rebuild a token from the three record fields. A nil (or empty)
    /// token field yields `None`.
    fn decode_record(tk: &[u8], fpi: &[u8], fpc: &[u8]) -> Result<Option<Token>, StoreError> {
        if tk.is_empty() || codec::is_nil(tk) {
            return Ok(None);
        }

        let mut token: Token = codec::decode(tk)?;
        token.fpi = codec::decode(fpi)?;
        token.fpc = codec::decode(fpc)?;
        Ok(Some(token))
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("namespace", &self.namespace)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("default_exp", &self.default_exp)
            .field("backend", &self.backend.is_some())
            .field("serializer", &self.serializer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::footprint::Footprint;

    use super::*;

    fn bare_store() -> Store {
        let mut store = Store::new(None, None);
        store.namespace = String::new();
        store
    }

    fn token_with_ids() -> Token {
        Token {
            id: Uuid::new_v4(),
            subject: Uuid::new_v4(),
            ..Token::default()
        }
    }

    fn b64(bytes: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(bytes)
    }

    #[test]
    fn namespace_defaults_to_store_prefix() {
        let store = Store::new(None, None);
        assert_eq!(store.namespace.len(), "store-".len() + 8);
        assert!(store.namespace.starts_with("store-"));
        // Suffix characters come from the z-base-32 alphabet.
        let alphabet = "ybndrfg8ejkmcpqxot1uwisza345h769";
        assert!(store.namespace["store-".len()..]
            .chars()
            .all(|c| alphabet.contains(c)));
    }

    #[test]
    fn storage_key_layout() {
        let mut store = bare_store();
        let token = token_with_ids();

        let expected = format!("{}:{}", b64(token.subject.as_bytes()), b64(token.id.as_bytes()));
        assert_eq!(store.storage_key(Some(&token), false), expected);

        store.namespace = "foo".to_owned();
        assert_eq!(
            store.storage_key(Some(&token), false),
            format!("foo:{expected}")
        );
    }

    #[test]
    fn storage_key_catch_all_ends_with_star() {
        let mut store = bare_store();
        store.namespace = "foo".to_owned();
        let token = token_with_ids();

        assert_eq!(
            store.storage_key(Some(&token), true),
            format!("foo:{}:*", b64(token.subject.as_bytes()))
        );
    }

    #[test]
    fn storage_key_for_absent_token_is_empty() {
        let store = bare_store();
        assert_eq!(store.storage_key(None, false), "");
        assert_eq!(store.storage_key(None, true), "");
    }

    #[test]
    fn encode_record_for_absent_token_is_three_nils() {
        let (tk, fpi, fpc) = Store::encode_record(None).unwrap();
        assert_eq!(tk, codec::NIL);
        assert_eq!(fpi, codec::NIL);
        assert_eq!(fpc, codec::NIL);
    }

    #[test]
    fn encode_record_without_footprints_has_nil_fields() {
        let token = token_with_ids();
        let (tk, fpi, fpc) = Store::encode_record(Some(&token)).unwrap();
        assert!(!codec::is_nil(&tk));
        assert_eq!(fpi, codec::NIL);
        assert_eq!(fpc, codec::NIL);
    }

    #[test]
    fn record_roundtrip_with_footprints() {
        let mut token = token_with_ids();
        token.issued = 1_700_000_000;
        token.fpi = Some(Footprint {
            timestamp: 1_700_000_000,
            referer: "https://app.example.org".to_owned(),
            ..Footprint::default()
        });

        let (tk, fpi, fpc) = Store::encode_record(Some(&token)).unwrap();
        let decoded = Store::decode_record(&tk, &fpi, &fpc).unwrap().unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn decode_record_of_nils_is_none() {
        let decoded = Store::decode_record(&codec::NIL, &codec::NIL, &codec::NIL).unwrap();
        assert!(decoded.is_none());

        let decoded = Store::decode_record(&[], &codec::NIL, &codec::NIL).unwrap();
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn operations_without_backend_fail() {
        let store = bare_store();
        let token = token_with_ids();

        assert!(matches!(
            store.revoke(&token).await,
            Err(StoreError::NoBackend)
        ));
        assert!(matches!(store.list(&token).await, Err(StoreError::NoBackend)));

        let (revoked, err) = store.revoke_many(std::slice::from_ref(&token)).await;
        assert_eq!(revoked, 0);
        assert!(matches!(err, Some(StoreError::NoBackend)));
    }

    #[tokio::test]
    async fn issue_without_serializer_fails() {
        let store = bare_store();
        let result = store
            .issue(Uuid::new_v4(), Duration::zero(), "", "", "", "")
            .await;
        assert!(matches!(result, Err(StoreError::NoSerializer)));
    }

    #[tokio::test]
    async fn revoke_many_of_nothing_is_a_noop() {
        let mut store = bare_store();
        store.backend = Some(Arc::new(tessera_storage::MemoryBackend::new()));
        let (revoked, err) = store.revoke_many(&[]).await;
        assert_eq!(revoked, 0);
        assert!(err.is_none());
    }
}
