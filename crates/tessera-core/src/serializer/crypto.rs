//! RSA and ECDSA signers.
//!
//! RSA keys serve both the PKCS#1 v1.5 and PSS schemes; the PSS salt length
//! equals the hash output length. ECDSA signatures are the fixed-width
//! concatenation `R || S` with zero-left-padded halves — exactly
//! `2 · key-byte-length` bytes — and verification rejects any other length.

use rsa::traits::PublicKeyParts as _;
use rsa::{Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest as _, Sha256, Sha384, Sha512};
use signature::{Signer as _, Verifier as _};

use super::{HashAlg, SerializerError, SignKey, SignMethod};

/// RSA moduli shorter than this are rejected at construction.
const RSA_MIN_BITS: usize = 1024;

enum CryptoKey {
    Rsa(Box<RsaPrivateKey>),
    P256(Box<p256::ecdsa::SigningKey>),
    P384(Box<p384::ecdsa::SigningKey>),
}

pub(super) struct CryptoSigner {
    method: SignMethod,
    key: CryptoKey,
    hash: HashAlg,
}

impl CryptoSigner {
    pub(super) fn new(
        method: SignMethod,
        key: Option<SignKey>,
        hash: Option<HashAlg>,
    ) -> Result<Self, SerializerError> {
        let method_name = match method {
            SignMethod::Rsa => "RSA",
            SignMethod::Pss => "RSA-PSS",
            SignMethod::Ecdsa => "ECDSA",
            SignMethod::None | SignMethod::Hmac => return Err(SerializerError::BadMethod),
        };
        let hash = hash.ok_or(SerializerError::BadHash {
            method: method_name,
        })?;

        let key = match (method, key) {
            (SignMethod::Rsa | SignMethod::Pss, Some(SignKey::Rsa(key))) => {
                key.validate().map_err(|e| SerializerError::BadKey {
                    reason: e.to_string(),
                })?;
                if key.size() * 8 < RSA_MIN_BITS {
                    return Err(SerializerError::BadKeyLen { min: "1024 bits" });
                }
                CryptoKey::Rsa(key)
            }
            (SignMethod::Rsa | SignMethod::Pss, _) => {
                return Err(SerializerError::BadKeyType {
                    expected: "RSA private key",
                });
            }
            (SignMethod::Ecdsa, Some(SignKey::EcdsaP256(key))) => {
                if hash != HashAlg::Sha256 {
                    return Err(SerializerError::BadHash {
                        method: "ECDSA P-256",
                    });
                }
                CryptoKey::P256(key)
            }
            (SignMethod::Ecdsa, Some(SignKey::EcdsaP384(key))) => {
                if hash != HashAlg::Sha384 {
                    return Err(SerializerError::BadHash {
                        method: "ECDSA P-384",
                    });
                }
                CryptoKey::P384(key)
            }
            (SignMethod::Ecdsa, _) => {
                return Err(SerializerError::BadKeyType {
                    expected: "ECDSA private key",
                });
            }
            _ => return Err(SerializerError::BadMethod),
        };

        Ok(Self { method, key, hash })
    }

    pub(super) fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SerializerError> {
        match &self.key {
            CryptoKey::Rsa(key) => self.rsa_sign(key, payload),
            CryptoKey::P256(key) => {
                let sig: p256::ecdsa::Signature = key.sign(payload);
                Ok(sig.to_bytes().to_vec())
            }
            CryptoKey::P384(key) => {
                let sig: p384::ecdsa::Signature = key.sign(payload);
                Ok(sig.to_bytes().to_vec())
            }
        }
    }

    pub(super) fn verify(&self, payload: &[u8], sig: &[u8]) -> Result<(), SerializerError> {
        match &self.key {
            CryptoKey::Rsa(key) => self.rsa_verify(&key.to_public_key(), payload, sig),
            CryptoKey::P256(key) => {
                let sig = p256::ecdsa::Signature::from_slice(sig)
                    .map_err(|_| SerializerError::BadSign)?;
                key.verifying_key()
                    .verify(payload, &sig)
                    .map_err(|_| SerializerError::BadSign)
            }
            CryptoKey::P384(key) => {
                let sig = p384::ecdsa::Signature::from_slice(sig)
                    .map_err(|_| SerializerError::BadSign)?;
                key.verifying_key()
                    .verify(payload, &sig)
                    .map_err(|_| SerializerError::BadSign)
            }
        }
    }

    fn rsa_sign(&self, key: &RsaPrivateKey, payload: &[u8]) -> Result<Vec<u8>, SerializerError> {
        let mut rng = rand::thread_rng();
        let signed = match (self.method, self.hash) {
            (SignMethod::Rsa, HashAlg::Sha256) => {
                key.sign(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(payload))
            }
            (SignMethod::Rsa, HashAlg::Sha384) => {
                key.sign(Pkcs1v15Sign::new::<Sha384>(), &Sha384::digest(payload))
            }
            (SignMethod::Rsa, HashAlg::Sha512) => {
                key.sign(Pkcs1v15Sign::new::<Sha512>(), &Sha512::digest(payload))
            }
            (SignMethod::Pss, HashAlg::Sha256) => {
                key.sign_with_rng(&mut rng, Pss::new::<Sha256>(), &Sha256::digest(payload))
            }
            (SignMethod::Pss, HashAlg::Sha384) => {
                key.sign_with_rng(&mut rng, Pss::new::<Sha384>(), &Sha384::digest(payload))
            }
            (SignMethod::Pss, HashAlg::Sha512) => {
                key.sign_with_rng(&mut rng, Pss::new::<Sha512>(), &Sha512::digest(payload))
            }
            _ => return Err(SerializerError::BadMethod),
        };

        signed.map_err(|e| SerializerError::Sign {
            reason: e.to_string(),
        })
    }

    fn rsa_verify(
        &self,
        key: &RsaPublicKey,
        payload: &[u8],
        sig: &[u8],
    ) -> Result<(), SerializerError> {
        let verified = match (self.method, self.hash) {
            (SignMethod::Rsa, HashAlg::Sha256) => {
                key.verify(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(payload), sig)
            }
            (SignMethod::Rsa, HashAlg::Sha384) => {
                key.verify(Pkcs1v15Sign::new::<Sha384>(), &Sha384::digest(payload), sig)
            }
            (SignMethod::Rsa, HashAlg::Sha512) => {
                key.verify(Pkcs1v15Sign::new::<Sha512>(), &Sha512::digest(payload), sig)
            }
            (SignMethod::Pss, HashAlg::Sha256) => {
                key.verify(Pss::new::<Sha256>(), &Sha256::digest(payload), sig)
            }
            (SignMethod::Pss, HashAlg::Sha384) => {
                key.verify(Pss::new::<Sha384>(), &Sha384::digest(payload), sig)
            }
            (SignMethod::Pss, HashAlg::Sha512) => {
                key.verify(Pss::new::<Sha512>(), &Sha512::digest(payload), sig)
            }
            _ => return Err(SerializerError::BadMethod),
        };

        verified.map_err(|_| SerializerError::BadSign)
    }
}
