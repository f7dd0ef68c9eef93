//! Key custody.
//!
//! `KeyCustody` is the boundary to the platform key store: it generates or
//! fetches keys by alias, deletes them, performs AES-GCM under resident
//! symmetric keys, and wraps/unwraps software keys under a resident RSA pair.
//! Raw bytes of resident keys never cross this boundary.
//!
//! `SoftwareKeyCustody` is an in-process implementation for hosts without a
//! hardware key store and for tests. It enforces the same policy as the
//! platform: per-operation keys refuse to work without a verified, unused
//! presence token.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{TimeDelta, Utc};

use rand::rngs::OsRng;
use ring::rand::{SecureRandom, SystemRandom};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::crypto::{self, NONCE_LEN};
use crate::error::{KeywardError, Result};
use crate::keys::{KeyMaterial, KeyPolicy, Padding, UserAuthentication};
use crate::session::{OperationChallenge, PresenceAuthority, PresenceToken};
use crate::wrap_spec::AsymmetricKeySpec;

/// The platform key-custody service.
///
/// Implementations must tolerate concurrent calls; encrypt and decrypt
/// sessions against the same alias may run in parallel.
pub trait KeyCustody: Send + Sync {
    /// Generate a symmetric key under `alias` unless one already exists.
    /// Returns `true` if a new key was generated.
    fn generate_or_fetch_symmetric(&self, alias: &str, policy: &KeyPolicy) -> Result<bool>;

    /// Generate an asymmetric pair for `spec.alias` unless one already
    /// exists. Returns `true` if a new pair was generated.
    fn generate_or_fetch_key_pair(&self, spec: &AsymmetricKeySpec) -> Result<bool>;

    fn contains(&self, alias: &str) -> Result<bool>;

    /// Irreversibly destroy the entry under `alias`. Deleting a missing
    /// alias is not an error.
    fn delete(&self, alias: &str) -> Result<()>;

    /// Start an operation under `alias`. Keys that need presence per
    /// operation return the challenge the presence token must answer.
    fn begin_operation(&self, alias: &str) -> Result<Option<OperationChallenge>>;

    /// Withdraw a challenge whose session ended without using it. Unknown
    /// or already consumed challenges are ignored.
    fn abandon_operation(&self, alias: &str, challenge: OperationChallenge) -> Result<()>;

    fn seal(
        &self,
        alias: &str,
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
        token: Option<&PresenceToken>,
    ) -> Result<Vec<u8>>;

    fn open(
        &self,
        alias: &str,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
        token: Option<&PresenceToken>,
    ) -> Result<Vec<u8>>;

    /// Encrypt `key_bytes` under the public half of the pair at `alias`.
    fn wrap(&self, alias: &str, key_bytes: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt a wrapped key with the private half of the pair at `alias`.
    fn unwrap(&self, alias: &str, wrapped: &[u8]) -> Result<KeyMaterial>;
}

// ---------------------------------------------------------------------------
// Software custody
// ---------------------------------------------------------------------------

/// Longest a presence token stays usable after it was issued.
pub const PRESENCE_TOKEN_MAX_AGE_SECS: i64 = 30;

enum Entry {
    Symmetric {
        material: KeyMaterial,
        policy: KeyPolicy,
    },
    KeyPair {
        private: RsaPrivateKey,
        public: RsaPublicKey,
    },
}

/// In-process key custody backed by `ring` and `rsa`.
pub struct SoftwareKeyCustody {
    entries: Mutex<HashMap<String, Entry>>,
    /// Outstanding challenges, mapped to the alias they were issued for.
    pending: Mutex<HashMap<u64, String>>,
    authority: PresenceAuthority,
    rng: SystemRandom,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| KeywardError::KeyUnavailable("custody lock poisoned".into()))
}

fn missing(alias: &str) -> KeywardError {
    KeywardError::KeyUnavailable(format!("no custody entry for alias {alias}"))
}

impl SoftwareKeyCustody {
    pub fn new() -> Result<Self> {
        Ok(Self {
            entries: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            authority: PresenceAuthority::generate()?,
            rng: SystemRandom::new(),
        })
    }

    /// The authority whose tokens this custody accepts. Hand it to the
    /// presence oracle.
    pub fn presence_authority(&self) -> PresenceAuthority {
        self.authority.clone()
    }

    /// Challenges issued and not yet consumed or withdrawn.
    pub fn outstanding_challenges(&self) -> usize {
        self.pending.lock().map(|pending| pending.len()).unwrap_or(0)
    }

    fn next_challenge(&self) -> Result<OperationChallenge> {
        let mut buf = [0u8; 8];
        self.rng
            .fill(&mut buf)
            .map_err(|_| KeywardError::RandomnessFailure)?;
        Ok(OperationChallenge::new(u64::from_be_bytes(buf)))
    }

    /// Check `token` against the key's policy and consume its challenge.
    fn authorize(
        &self,
        alias: &str,
        policy: &KeyPolicy,
        token: Option<&PresenceToken>,
    ) -> Result<()> {
        let minimum = match policy.user_authentication {
            UserAuthentication::NotRequired | UserAuthentication::DeviceSession => return Ok(()),
            UserAuthentication::PerOperation { minimum } => minimum,
        };

        let token = token.ok_or_else(|| {
            KeywardError::PresenceDenied(format!("key {alias} requires a presence token"))
        })?;
        self.authority.verify(token)?;

        // One authentication authorises exactly one operation, even if the
        // class turns out to be too weak.
        let issued_for = lock(&self.pending)?.remove(&token.challenge().value());
        if issued_for.as_deref() != Some(alias) {
            return Err(KeywardError::PresenceDenied(
                "challenge not outstanding for this key".into(),
            ));
        }

        let age = Utc::now().signed_duration_since(token.issued_at());
        if age > TimeDelta::seconds(PRESENCE_TOKEN_MAX_AGE_SECS) {
            return Err(KeywardError::PresenceDenied("presence token expired".into()));
        }

        if let Some(minimum) = minimum {
            if !token.class().satisfies(minimum) {
                return Err(KeywardError::PresenceDenied(format!(
                    "authenticator class {:?} below required {:?}",
                    token.class(),
                    minimum
                )));
            }
        }
        Ok(())
    }

    fn with_symmetric<T>(
        &self,
        alias: &str,
        token: Option<&PresenceToken>,
        op: impl FnOnce(&KeyMaterial) -> Result<T>,
    ) -> Result<T> {
        let entries = lock(&self.entries)?;
        match entries.get(alias) {
            Some(Entry::Symmetric { material, policy }) => {
                self.authorize(alias, policy, token)?;
                op(material)
            }
            Some(Entry::KeyPair { .. }) => Err(KeywardError::InvalidKey),
            None => Err(missing(alias)),
        }
    }
}

impl KeyCustody for SoftwareKeyCustody {
    fn generate_or_fetch_symmetric(&self, alias: &str, policy: &KeyPolicy) -> Result<bool> {
        let mut entries = lock(&self.entries)?;
        match entries.get(alias) {
            Some(Entry::Symmetric { .. }) => Ok(false),
            Some(Entry::KeyPair { .. }) => Err(KeywardError::InvalidKey),
            None => {
                if policy.key_size_bits != crypto::KEY_LEN * 8 || policy.padding != Padding::None
                {
                    return Err(KeywardError::InvalidKey);
                }
                let material = KeyMaterial::generate()?;
                entries.insert(
                    alias.to_string(),
                    Entry::Symmetric {
                        material,
                        policy: policy.clone(),
                    },
                );
                info!(alias, "generated symmetric key");
                Ok(true)
            }
        }
    }

    fn generate_or_fetch_key_pair(&self, spec: &AsymmetricKeySpec) -> Result<bool> {
        let mut entries = lock(&self.entries)?;
        match entries.get(&spec.alias) {
            Some(Entry::KeyPair { .. }) => Ok(false),
            Some(Entry::Symmetric { .. }) => Err(KeywardError::InvalidKey),
            None => {
                if spec.policy.padding != Padding::RsaPkcs1 {
                    return Err(KeywardError::InvalidKey);
                }
                let private = RsaPrivateKey::new(&mut OsRng, spec.policy.key_size_bits)
                    .map_err(|_| KeywardError::InvalidKey)?;
                let public = RsaPublicKey::from(&private);
                entries.insert(spec.alias.clone(), Entry::KeyPair { private, public });
                info!(
                    alias = %spec.alias,
                    certificate = spec.certificate.is_some(),
                    "generated wrapping key pair"
                );
                Ok(true)
            }
        }
    }

    fn contains(&self, alias: &str) -> Result<bool> {
        Ok(lock(&self.entries)?.contains_key(alias))
    }

    fn delete(&self, alias: &str) -> Result<()> {
        if lock(&self.entries)?.remove(alias).is_some() {
            lock(&self.pending)?.retain(|_, issued_for| issued_for != alias);
            info!(alias, "deleted custody entry");
        }
        Ok(())
    }

    fn begin_operation(&self, alias: &str) -> Result<Option<OperationChallenge>> {
        let entries = lock(&self.entries)?;
        let policy = match entries.get(alias) {
            Some(Entry::Symmetric { policy, .. }) => policy,
            Some(Entry::KeyPair { .. }) => return Ok(None),
            None => return Err(missing(alias)),
        };
        if !policy.requires_presence_per_operation() {
            return Ok(None);
        }
        let challenge = self.next_challenge()?;
        lock(&self.pending)?.insert(challenge.value(), alias.to_string());
        debug!(alias, "issued operation challenge");
        Ok(Some(challenge))
    }

    fn abandon_operation(&self, alias: &str, challenge: OperationChallenge) -> Result<()> {
        let mut pending = lock(&self.pending)?;
        if pending.get(&challenge.value()).map(String::as_str) == Some(alias) {
            pending.remove(&challenge.value());
            debug!(alias, "withdrew unused operation challenge");
        }
        Ok(())
    }

    fn seal(
        &self,
        alias: &str,
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
        token: Option<&PresenceToken>,
    ) -> Result<Vec<u8>> {
        self.with_symmetric(alias, token, |material| {
            crypto::seal(material.as_bytes(), nonce, plaintext)
        })
    }

    fn open(
        &self,
        alias: &str,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
        token: Option<&PresenceToken>,
    ) -> Result<Vec<u8>> {
        self.with_symmetric(alias, token, |material| {
            crypto::open(material.as_bytes(), nonce, ciphertext)
        })
    }

    fn wrap(&self, alias: &str, key_bytes: &[u8]) -> Result<Vec<u8>> {
        let entries = lock(&self.entries)?;
        match entries.get(alias) {
            Some(Entry::KeyPair { public, .. }) => public
                .encrypt(&mut OsRng, Pkcs1v15Encrypt, key_bytes)
                .map_err(|_| KeywardError::EncryptionFailure),
            Some(Entry::Symmetric { .. }) => Err(KeywardError::InvalidKey),
            None => Err(missing(alias)),
        }
    }

    fn unwrap(&self, alias: &str, wrapped: &[u8]) -> Result<KeyMaterial> {
        let entries = lock(&self.entries)?;
        match entries.get(alias) {
            Some(Entry::KeyPair { private, .. }) => {
                let bytes = Zeroizing::new(private.decrypt(Pkcs1v15Encrypt, wrapped).map_err(
                    |_| {
                        warn!(alias, "wrapped key did not decrypt");
                        KeywardError::KeyUnavailable("wrapped key did not decrypt".into())
                    },
                )?);
                KeyMaterial::from_slice(&bytes)
            }
            Some(Entry::Symmetric { .. }) => Err(KeywardError::InvalidKey),
            None => Err(missing(alias)),
        }
    }
}
