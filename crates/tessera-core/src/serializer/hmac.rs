//! HMAC signer.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq as _;

use super::{HashAlg, SerializerError, SignKey};

/// HMAC secrets shorter than this are rejected at construction.
const MIN_KEY_LEN: usize = 256;

pub(super) struct HmacSigner {
    key: Vec<u8>,
    hash: HashAlg,
}

impl HmacSigner {
    pub(super) fn new(
        key: Option<SignKey>,
        hash: Option<HashAlg>,
    ) -> Result<Self, SerializerError> {
        let hash = hash.ok_or(SerializerError::BadHash { method: "HMAC" })?;

        let Some(SignKey::Hmac(key)) = key else {
            return Err(SerializerError::BadKeyType {
                expected: "byte slice",
            });
        };
        if key.len() < MIN_KEY_LEN {
            return Err(SerializerError::BadKeyLen { min: "256 bytes" });
        }

        Ok(Self { key, hash })
    }

    pub(super) fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SerializerError> {
        match self.hash {
            HashAlg::Sha256 => mac_digest::<Hmac<Sha256>>(&self.key, payload),
            HashAlg::Sha384 => mac_digest::<Hmac<Sha384>>(&self.key, payload),
            HashAlg::Sha512 => mac_digest::<Hmac<Sha512>>(&self.key, payload),
        }
    }

    /// Constant-time comparison of the recomputed digest against `sig`.
    /// Lengths must match exactly.
    pub(super) fn verify(&self, payload: &[u8], sig: &[u8]) -> Result<(), SerializerError> {
        let expected = self.sign(payload)?;
        if expected.len() != sig.len() || !bool::from(expected.ct_eq(sig)) {
            return Err(SerializerError::BadSign);
        }
        Ok(())
    }
}

fn mac_digest<M: Mac + KeyInit>(key: &[u8], payload: &[u8]) -> Result<Vec<u8>, SerializerError> {
    let mut mac =
        <M as KeyInit>::new_from_slice(key).map_err(|_| SerializerError::BadKeyLen {
            min: "256 bytes",
        })?;
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}
