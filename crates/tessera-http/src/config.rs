//! Store configuration.
//!
//! Loads configuration from `TESSERA_*` environment variables with
//! sensible defaults, then assembles a [`Store`] from it — reading key
//! material from disk and connecting the backend when a URL is set.

use tessera_core::{HashAlg, SignKey, SignMethod, Store, StoreError};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis-protocol backend URL. `None` leaves the store without a
    /// backend until one is attached.
    pub backend_url: Option<String>,
    /// Issuer URI stamped on every token.
    pub issuer: String,
    /// Audience list; comma-separated in the environment.
    pub audience: Vec<String>,
    /// Default expiry in seconds; `0` keeps the store default of 72 hours.
    pub default_exp_secs: i64,
    /// Explicit key namespace; `None` keeps the random per-store default.
    pub namespace: Option<String>,
    /// Signature configuration.
    pub sign: SignConfig,
}

/// Sign method configuration.
#[derive(Debug, Clone)]
pub enum SignConfig {
    /// No signature segment. Fine for tests, inadvisable anywhere else.
    None,
    /// HMAC with a raw secret read from `key_file`.
    Hmac { key_file: String, hash: HashAlg },
    /// RSASSA-PKCS1-v1.5 (or PSS) with a PKCS#8 PEM key from `key_file`.
    Rsa {
        key_file: String,
        hash: HashAlg,
        pss: bool,
    },
    /// ECDSA with a PKCS#8 PEM key from `key_file`. The curve follows the
    /// hash: SHA-256 ⇒ P-256, SHA-384 ⇒ P-384.
    Ecdsa { key_file: String, hash: HashAlg },
}

/// Errors assembling a store from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The key file could not be read.
    #[error("failed to read key file '{path}': {reason}")]
    KeyFile { path: String, reason: String },

    /// The key file was read but its contents are unusable.
    #[error("unusable key in '{path}': {reason}")]
    Key { path: String, reason: String },

    /// A backend URL is configured but the crate was built without the
    /// `redis-backend` feature.
    #[error("backend url '{url}' configured but the redis-backend feature is disabled")]
    BackendUnavailable { url: String },

    /// The store rejected the assembled configuration.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TESSERA_BACKEND_URL` — Redis URL, e.g. `redis://127.0.0.1:6379/0` (optional)
    /// - `TESSERA_ISSUER` — issuer URI (default: empty)
    /// - `TESSERA_AUDIENCE` — comma-separated audience list (default: empty)
    /// - `TESSERA_DEFAULT_EXP_SECS` — default token expiry in seconds (default: `0`, store default)
    /// - `TESSERA_NAMESPACE` — explicit key namespace (default: random)
    /// - `TESSERA_SIGN_METHOD` — `none`, `hmac`, `rsa`, `pss`, or `ecdsa` (default: `none`)
    /// - `TESSERA_SIGN_KEY_FILE` — path to the key material (required unless `none`)
    /// - `TESSERA_SIGN_HASH` — `sha256`, `sha384`, or `sha512` (default: `sha256`)
    #[must_use]
    pub fn from_env() -> Self {
        let backend_url = std::env::var("TESSERA_BACKEND_URL").ok();
        let issuer = std::env::var("TESSERA_ISSUER").unwrap_or_default();
        let audience = std::env::var("TESSERA_AUDIENCE")
            .map(|v| split_audience(&v))
            .unwrap_or_default();
        let default_exp_secs = std::env::var("TESSERA_DEFAULT_EXP_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let namespace = std::env::var("TESSERA_NAMESPACE").ok();

        let method = std::env::var("TESSERA_SIGN_METHOD").unwrap_or_else(|_| "none".to_owned());
        let key_file = std::env::var("TESSERA_SIGN_KEY_FILE").unwrap_or_default();
        let hash = std::env::var("TESSERA_SIGN_HASH")
            .ok()
            .and_then(|v| parse_hash(&v))
            .unwrap_or(HashAlg::Sha256);

        let sign = match method.to_lowercase().as_str() {
            "hmac" => SignConfig::Hmac { key_file, hash },
            "rsa" => SignConfig::Rsa {
                key_file,
                hash,
                pss: false,
            },
            "pss" => SignConfig::Rsa {
                key_file,
                hash,
                pss: true,
            },
            "ecdsa" => SignConfig::Ecdsa { key_file, hash },
            _ => SignConfig::None,
        };

        Self {
            backend_url,
            issuer,
            audience,
            default_exp_secs,
            namespace,
            sign,
        }
    }

    /// Assemble a store: load key material, build the serializer, and
    /// connect the backend when a URL is configured.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if key material cannot be loaded, the
    /// serializer rejects it, or the backend connection fails.
    pub async fn build_store(&self) -> Result<Store, ConfigError> {
        let (method, key, hash) = self.sign_material()?;

        let mut store = Store::new(None, None);
        store.use_serializer(method, key, hash)?;

        store.issuer = self.issuer.clone();
        store.audience = self.audience.clone();
        if self.default_exp_secs > 0 {
            store.default_exp = chrono::Duration::seconds(self.default_exp_secs);
        }
        if let Some(namespace) = &self.namespace {
            store.namespace = namespace.clone();
        }

        if let Some(url) = &self.backend_url {
            #[cfg(feature = "redis-backend")]
            store.connect_backend(url).await?;
            #[cfg(not(feature = "redis-backend"))]
            return Err(ConfigError::BackendUnavailable { url: url.clone() });
        }

        Ok(store)
    }

    fn sign_material(
        &self,
    ) -> Result<(SignMethod, Option<SignKey>, Option<HashAlg>), ConfigError> {
        match &self.sign {
            SignConfig::None => Ok((SignMethod::None, None, None)),

            SignConfig::Hmac { key_file, hash } => {
                let secret = std::fs::read(key_file).map_err(|e| ConfigError::KeyFile {
                    path: key_file.clone(),
                    reason: e.to_string(),
                })?;
                Ok((SignMethod::Hmac, Some(SignKey::Hmac(secret)), Some(*hash)))
            }

            SignConfig::Rsa {
                key_file,
                hash,
                pss,
            } => {
                use rsa::pkcs8::DecodePrivateKey as _;

                let pem = read_pem(key_file)?;
                let key = rsa::RsaPrivateKey::from_pkcs8_pem(&pem).map_err(|e| {
                    ConfigError::Key {
                        path: key_file.clone(),
                        reason: e.to_string(),
                    }
                })?;
                let method = if *pss { SignMethod::Pss } else { SignMethod::Rsa };
                Ok((method, Some(SignKey::Rsa(Box::new(key))), Some(*hash)))
            }

            SignConfig::Ecdsa { key_file, hash } => {
                let pem = read_pem(key_file)?;
                let key = match hash {
                    HashAlg::Sha256 => {
                        use p256::pkcs8::DecodePrivateKey as _;
                        SignKey::EcdsaP256(Box::new(
                            p256::ecdsa::SigningKey::from_pkcs8_pem(&pem).map_err(|e| {
                                ConfigError::Key {
                                    path: key_file.clone(),
                                    reason: e.to_string(),
                                }
                            })?,
                        ))
                    }
                    HashAlg::Sha384 => {
                        use p384::pkcs8::DecodePrivateKey as _;
                        SignKey::EcdsaP384(Box::new(
                            p384::ecdsa::SigningKey::from_pkcs8_pem(&pem).map_err(|e| {
                                ConfigError::Key {
                                    path: key_file.clone(),
                                    reason: e.to_string(),
                                }
                            })?,
                        ))
                    }
                    HashAlg::Sha512 => {
                        return Err(ConfigError::Key {
                            path: key_file.clone(),
                            reason: "no supported curve pairs with sha512".to_owned(),
                        });
                    }
                };
                Ok((SignMethod::Ecdsa, Some(key), Some(*hash)))
            }
        }
    }
}

fn read_pem(path: &str) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::KeyFile {
        path: path.to_owned(),
        reason: e.to_string(),
    })
}

fn parse_hash(v: &str) -> Option<HashAlg> {
    match v.to_lowercase().as_str() {
        "sha256" => Some(HashAlg::Sha256),
        "sha384" => Some(HashAlg::Sha384),
        "sha512" => Some(HashAlg::Sha512),
        _ => None,
    }
}

fn split_audience(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_names_parse_case_insensitively() {
        assert_eq!(parse_hash("SHA256"), Some(HashAlg::Sha256));
        assert_eq!(parse_hash("sha384"), Some(HashAlg::Sha384));
        assert_eq!(parse_hash("Sha512"), Some(HashAlg::Sha512));
        assert_eq!(parse_hash("md5"), None);
    }

    #[test]
    fn audience_splits_on_commas_and_trims() {
        assert_eq!(
            split_audience("https://a.example.org, https://b.example.org,,"),
            vec![
                "https://a.example.org".to_owned(),
                "https://b.example.org".to_owned()
            ]
        );
        assert!(split_audience("").is_empty());
    }

    #[tokio::test]
    async fn none_config_builds_a_serializer_only_store() {
        let config = StoreConfig {
            backend_url: None,
            issuer: "https://auth.example.org".to_owned(),
            audience: vec!["https://api.example.org".to_owned()],
            default_exp_secs: 3600,
            namespace: Some("testns".to_owned()),
            sign: SignConfig::None,
        };

        let store = config.build_store().await.expect("build store");
        assert!(store.has_serializer());
        assert!(!store.has_backend());
        assert_eq!(store.namespace, "testns");
        assert_eq!(store.issuer, "https://auth.example.org");
        assert_eq!(store.default_exp, chrono::Duration::seconds(3600));
    }

    #[tokio::test]
    async fn missing_key_file_fails() {
        let config = StoreConfig {
            backend_url: None,
            issuer: String::new(),
            audience: Vec::new(),
            default_exp_secs: 0,
            namespace: None,
            sign: SignConfig::Hmac {
                key_file: "/nonexistent/key".to_owned(),
                hash: HashAlg::Sha256,
            },
        };

        let err = config.build_store().await.expect_err("missing key file");
        assert!(matches!(err, ConfigError::KeyFile { .. }));
    }
}
