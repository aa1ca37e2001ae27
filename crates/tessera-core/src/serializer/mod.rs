//! Token serialization: the `auth.` string form and its signatures.
//!
//! The externally visible form of a token is
//!
//! ```text
//! "auth." base64url(payload-bytes) [ "." base64url(signature-bytes) ]
//! ```
//!
//! The idea comes from JSON Web Tokens, but the format is deliberately
//! incompatible with RFC 7519: the header is a fixed plaintext prefix, the
//! payload is the compact binary object encoding rather than JSON, and the
//! signature is computed over the raw binary payload — not its base64
//! form. Base64 uses the URL-safe alphabet without padding.
//!
//! The signature segment is present iff a sign method other than
//! [`SignMethod::None`] is configured. Running without a signature is
//! possible but highly inadvisable for anything production-shaped.

mod crypto;
mod error;
mod hmac;

pub use error::SerializerError;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec;
use crate::pool::ENCODE_BUFFERS;

use self::crypto::CryptoSigner;
use self::hmac::HmacSigner;

/// Header prefix of every string token.
const HEADER: &str = "auth.";

/// Methods available for computing the signature segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignMethod {
    /// No signature segment at all.
    None,
    /// HMAC digest of the payload.
    Hmac,
    /// RSASSA-PKCS1-v1.5.
    Rsa,
    /// RSASSA-PSS, salt length equal to the hash length.
    Pss,
    /// ECDSA over NIST P-256 or P-384.
    Ecdsa,
}

/// Hash used to digest the payload prior to signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Sha256,
    Sha384,
    Sha512,
}

/// Key material for a [`Serializer`].
///
/// The variant must match the sign method: [`SignKey::Hmac`] for HMAC,
/// [`SignKey::Rsa`] for both RSA schemes, and one of the ECDSA variants for
/// [`SignMethod::Ecdsa`].
pub enum SignKey {
    /// Raw HMAC secret, at least 256 bytes.
    Hmac(Vec<u8>),
    /// RSA private key with a modulus of at least 1024 bits.
    Rsa(Box<rsa::RsaPrivateKey>),
    /// NIST P-256 signing key; pairs with [`HashAlg::Sha256`].
    EcdsaP256(Box<p256::ecdsa::SigningKey>),
    /// NIST P-384 signing key; pairs with [`HashAlg::Sha384`].
    EcdsaP384(Box<p384::ecdsa::SigningKey>),
}

enum Signer {
    None,
    Hmac(HmacSigner),
    Crypto(CryptoSigner),
}

/// Converts tokens to and from their signed string form.
pub struct Serializer {
    signer: Signer,
}

impl Serializer {
    /// Build a serializer for the given sign method.
    ///
    /// `key` and `hash` are ignored for [`SignMethod::None`] and required
    /// otherwise. Key material is validated here, never at signing time.
    ///
    /// # Errors
    ///
    /// - [`SerializerError::BadKeyType`] if the key variant does not match
    ///   the method.
    /// - [`SerializerError::BadKeyLen`] for a short HMAC secret or RSA
    ///   modulus.
    /// - [`SerializerError::BadHash`] for a missing hash, or an ECDSA
    ///   curve/hash mismatch.
    pub fn new(
        method: SignMethod,
        key: Option<SignKey>,
        hash: Option<HashAlg>,
    ) -> Result<Self, SerializerError> {
        let signer = match method {
            SignMethod::None => Signer::None,
            SignMethod::Hmac => Signer::Hmac(HmacSigner::new(key, hash)?),
            SignMethod::Rsa | SignMethod::Pss | SignMethod::Ecdsa => {
                Signer::Crypto(CryptoSigner::new(method, key, hash)?)
            }
        };
        Ok(Self { signer })
    }

    fn signs(&self) -> bool {
        !matches!(self.signer, Signer::None)
    }

    fn sign(&self, payload: &[u8]) -> Result<Option<Vec<u8>>, SerializerError> {
        match &self.signer {
            Signer::None => Ok(None),
            Signer::Hmac(signer) => signer.sign(payload).map(Some),
            Signer::Crypto(signer) => signer.sign(payload).map(Some),
        }
    }

    fn verify(&self, payload: &[u8], sig: &[u8]) -> Result<(), SerializerError> {
        match &self.signer {
            Signer::None => Ok(()),
            Signer::Hmac(signer) => signer.verify(payload, sig),
            Signer::Crypto(signer) => signer.verify(payload, sig),
        }
    }

    /// Encode (and sign) a payload into its string form.
    ///
    /// # Errors
    ///
    /// Returns [`SerializerError::Codec`] if the payload rejects encoding,
    /// or [`SerializerError::Sign`] if the signing primitive fails.
    pub fn serialize<T: Serialize>(&self, payload: &T) -> Result<String, SerializerError> {
        let mut buf = ENCODE_BUFFERS.acquire();
        codec::encode_into(&mut buf, payload)?;

        let mut out = String::with_capacity(HEADER.len() + buf.len().div_ceil(3) * 4);
        out.push_str(HEADER);
        URL_SAFE_NO_PAD.encode_string(buf.as_slice(), &mut out);

        if let Some(sig) = self.sign(&buf)? {
            out.push('.');
            URL_SAFE_NO_PAD.encode_string(&sig, &mut out);
        }

        Ok(out)
    }

    /// Decode a string token, verifying its signature when one is
    /// configured.
    ///
    /// The payload and signature segments are base64-decoded on two
    /// concurrent tasks, joined before verification. A signature failure
    /// masks any payload decode failure.
    ///
    /// # Errors
    ///
    /// - [`SerializerError::BadFormat`] for a missing header, wrong segment
    ///   count, empty segment, or corrupt base64.
    /// - [`SerializerError::BadSign`] if the signature does not verify.
    /// - [`SerializerError::Codec`] if the payload bytes do not decode.
    pub async fn deserialize<T: DeserializeOwned>(&self, s: &str) -> Result<T, SerializerError> {
        let rest = s.strip_prefix(HEADER).ok_or(SerializerError::BadFormat)?;
        if rest.is_empty() {
            return Err(SerializerError::BadFormat);
        }

        if !self.signs() {
            // Unsigned form: a single payload segment.
            let payload = URL_SAFE_NO_PAD
                .decode(rest)
                .map_err(|_| SerializerError::BadFormat)?;
            return Ok(codec::decode(&payload)?);
        }

        let dot = rest.find('.').ok_or(SerializerError::BadFormat)?;
        if dot == 0 || dot == rest.len() - 1 {
            return Err(SerializerError::BadFormat);
        }

        let payload_b64 = rest[..dot].to_owned();
        let sig_b64 = rest[dot + 1..].to_owned();
        let (payload, sig) = tokio::try_join!(
            tokio::task::spawn_blocking(move || URL_SAFE_NO_PAD.decode(payload_b64)),
            tokio::task::spawn_blocking(move || URL_SAFE_NO_PAD.decode(sig_b64)),
        )
        .map_err(|_| SerializerError::BadFormat)?;

        let payload = payload.map_err(|_| SerializerError::BadFormat)?;
        let sig = sig.map_err(|_| SerializerError::BadFormat)?;

        self.verify(&payload, &sig)?;
        Ok(codec::decode(&payload)?)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Payload {
        #[serde(rename = "uri", skip_serializing_if = "String::is_empty", default)]
        uri: String,
        #[serde(rename = "ts1")]
        ts1: i64,
        #[serde(rename = "ts2", default)]
        ts2: i64,
    }

    fn payload() -> Payload {
        Payload {
            uri: "https://api.example.com".to_owned(),
            ts1: 1_700_000_000,
            ts2: 1_700_604_800,
        }
    }

    fn hmac_key() -> SignKey {
        SignKey::Hmac(vec![0x5A; 256])
    }

    fn rsa_key() -> rsa::RsaPrivateKey {
        rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("generate rsa key")
    }

    fn none_serializer() -> Serializer {
        Serializer::new(SignMethod::None, None, None).expect("none serializer")
    }

    fn hmac_serializer() -> Serializer {
        Serializer::new(SignMethod::Hmac, Some(hmac_key()), Some(HashAlg::Sha256))
            .expect("hmac serializer")
    }

    fn ecdsa_serializer() -> Serializer {
        let key = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
        Serializer::new(
            SignMethod::Ecdsa,
            Some(SignKey::EcdsaP256(Box::new(key))),
            Some(HashAlg::Sha256),
        )
        .expect("ecdsa serializer")
    }

    #[test]
    fn unsigned_form_has_two_segments() {
        let s = none_serializer().serialize(&payload()).unwrap();
        assert!(s.starts_with("auth."));
        assert_eq!(s.matches('.').count(), 1);
    }

    #[test]
    fn signed_form_has_three_segments() {
        let s = hmac_serializer().serialize(&payload()).unwrap();
        assert!(s.starts_with("auth."));
        assert_eq!(s.matches('.').count(), 2);
    }

    #[tokio::test]
    async fn unsigned_roundtrip() {
        let serializer = none_serializer();
        let s = serializer.serialize(&payload()).unwrap();
        let decoded: Payload = serializer.deserialize(&s).await.unwrap();
        assert_eq!(decoded, payload());
    }

    #[tokio::test]
    async fn hmac_roundtrip() {
        let serializer = hmac_serializer();
        let s = serializer.serialize(&payload()).unwrap();
        let decoded: Payload = serializer.deserialize(&s).await.unwrap();
        assert_eq!(decoded, payload());
    }

    #[tokio::test]
    async fn rsa_pkcs1v15_roundtrip() {
        let serializer = Serializer::new(
            SignMethod::Rsa,
            Some(SignKey::Rsa(Box::new(rsa_key()))),
            Some(HashAlg::Sha256),
        )
        .unwrap();
        let s = serializer.serialize(&payload()).unwrap();
        let decoded: Payload = serializer.deserialize(&s).await.unwrap();
        assert_eq!(decoded, payload());
    }

    #[tokio::test]
    async fn rsa_pss_roundtrip() {
        let serializer = Serializer::new(
            SignMethod::Pss,
            Some(SignKey::Rsa(Box::new(rsa_key()))),
            Some(HashAlg::Sha256),
        )
        .unwrap();
        let s = serializer.serialize(&payload()).unwrap();
        let decoded: Payload = serializer.deserialize(&s).await.unwrap();
        assert_eq!(decoded, payload());
    }

    #[tokio::test]
    async fn ecdsa_roundtrip() {
        let serializer = ecdsa_serializer();
        let s = serializer.serialize(&payload()).unwrap();
        let decoded: Payload = serializer.deserialize(&s).await.unwrap();
        assert_eq!(decoded, payload());
    }

    #[test]
    fn ecdsa_signature_is_fixed_width() {
        let serializer = ecdsa_serializer();
        let s = serializer.serialize(&payload()).unwrap();
        let sig_b64 = s.rsplit('.').next().unwrap();
        let sig = URL_SAFE_NO_PAD.decode(sig_b64).unwrap();
        // P-256: two 32-byte halves.
        assert_eq!(sig.len(), 64);
    }

    #[tokio::test]
    async fn ecdsa_rejects_truncated_signature() {
        let serializer = ecdsa_serializer();
        let s = serializer.serialize(&payload()).unwrap();

        let dot = s.rfind('.').unwrap();
        let mut sig = URL_SAFE_NO_PAD.decode(&s[dot + 1..]).unwrap();
        sig.truncate(63);
        let tampered = format!("{}.{}", &s[..dot], URL_SAFE_NO_PAD.encode(&sig));

        let result: Result<Payload, _> = serializer.deserialize(&tampered).await;
        assert!(matches!(result, Err(SerializerError::BadSign)));
    }

    #[tokio::test]
    async fn tampered_signature_fails() {
        let serializer = hmac_serializer();
        let s = serializer.serialize(&payload()).unwrap();

        let dot = s.rfind('.').unwrap();
        let mut sig = URL_SAFE_NO_PAD.decode(&s[dot + 1..]).unwrap();
        sig[0] ^= 0x01;
        let tampered = format!("{}.{}", &s[..dot], URL_SAFE_NO_PAD.encode(&sig));

        let result: Result<Payload, _> = serializer.deserialize(&tampered).await;
        assert!(matches!(result, Err(SerializerError::BadSign)));
    }

    #[tokio::test]
    async fn tampered_payload_fails() {
        let serializer = hmac_serializer();
        let s = serializer.serialize(&payload()).unwrap();

        let dot = s.rfind('.').unwrap();
        let mut body = URL_SAFE_NO_PAD.decode(&s["auth.".len()..dot]).unwrap();
        body[0] ^= 0x01;
        let tampered = format!("auth.{}.{}", URL_SAFE_NO_PAD.encode(&body), &s[dot + 1..]);

        let result: Result<Payload, _> = serializer.deserialize(&tampered).await;
        assert!(matches!(result, Err(SerializerError::BadSign)));
    }

    #[tokio::test]
    async fn missing_header_fails() {
        let result: Result<Payload, _> = none_serializer().deserialize("nope.abc").await;
        assert!(matches!(result, Err(SerializerError::BadFormat)));
    }

    #[tokio::test]
    async fn missing_signature_segment_fails_when_signing() {
        let serializer = hmac_serializer();
        let unsigned = none_serializer().serialize(&payload()).unwrap();
        let result: Result<Payload, _> = serializer.deserialize(&unsigned).await;
        assert!(matches!(result, Err(SerializerError::BadFormat)));
    }

    #[tokio::test]
    async fn empty_segments_fail() {
        let serializer = hmac_serializer();
        for s in ["auth.", "auth..sig", "auth.payload."] {
            let result: Result<Payload, _> = serializer.deserialize(s).await;
            assert!(matches!(result, Err(SerializerError::BadFormat)), "{s}");
        }
    }

    #[tokio::test]
    async fn corrupt_base64_fails_as_bad_format() {
        let result: Result<Payload, _> = none_serializer().deserialize("auth.!!!").await;
        assert!(matches!(result, Err(SerializerError::BadFormat)));

        let result: Result<Payload, _> = hmac_serializer().deserialize("auth.!!!.???").await;
        assert!(matches!(result, Err(SerializerError::BadFormat)));
    }

    #[test]
    fn hmac_key_too_short() {
        let result = Serializer::new(
            SignMethod::Hmac,
            Some(SignKey::Hmac(vec![0; 255])),
            Some(HashAlg::Sha256),
        );
        assert!(matches!(result, Err(SerializerError::BadKeyLen { .. })));
    }

    #[test]
    fn wrong_key_variant_is_rejected() {
        let result = Serializer::new(SignMethod::Hmac, None, Some(HashAlg::Sha256));
        assert!(matches!(result, Err(SerializerError::BadKeyType { .. })));

        let result = Serializer::new(SignMethod::Rsa, Some(hmac_key()), Some(HashAlg::Sha256));
        assert!(matches!(result, Err(SerializerError::BadKeyType { .. })));

        let result = Serializer::new(SignMethod::Ecdsa, Some(hmac_key()), Some(HashAlg::Sha256));
        assert!(matches!(result, Err(SerializerError::BadKeyType { .. })));
    }

    #[test]
    fn missing_hash_is_rejected() {
        let result = Serializer::new(SignMethod::Hmac, Some(hmac_key()), None);
        assert!(matches!(result, Err(SerializerError::BadHash { .. })));
    }

    #[test]
    fn ecdsa_curve_hash_mismatch_is_rejected() {
        let key = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
        let result = Serializer::new(
            SignMethod::Ecdsa,
            Some(SignKey::EcdsaP256(Box::new(key))),
            Some(HashAlg::Sha512),
        );
        assert!(matches!(result, Err(SerializerError::BadHash { .. })));
    }
}
