//! Key policy and key ownership.
//!
//! This module owns two responsibilities:
//! 1. Describing the usage policy a key is generated under (`KeyPolicy`).
//! 2. Holding key references in types that never expose raw bytes to
//!    callers (`SymmetricKeyHandle`, `KeyMaterial`).
//!
//! A handle points either at a key resident in a `KeyCustody` (the
//! cryptographic operation happens inside custody) or at a software key that
//! was just unwrapped, whose bytes are zeroised when the last handle drops.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, KEY_LEN, NONCE_LEN};
use crate::custody::KeyCustody;
use crate::error::{KeywardError, Result};
use crate::presence::AuthenticatorClass;
use crate::session::{OperationChallenge, PresenceToken};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// What a key may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPurpose {
    Encrypt,
    Decrypt,
}

/// Block mode a key is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockMode {
    /// Authenticated counter mode.
    Gcm,
    /// Single-block mode; only used to wrap fixed-size key material.
    Ecb,
}

/// Padding a key is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Padding {
    None,
    RsaPkcs1,
}

/// When the user must prove presence before the key can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserAuthentication {
    /// The key is usable without any presence check.
    NotRequired,
    /// The key is usable while the device credential session is unlocked.
    DeviceSession,
    /// Every operation needs its own fresh presence token (validity window
    /// of zero seconds). `minimum` is `None` when the platform cannot
    /// restrict the authenticator class.
    PerOperation { minimum: Option<AuthenticatorClass> },
}

/// Usage policy attached to a key at generation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPolicy {
    pub key_size_bits: usize,
    pub purposes: Vec<KeyPurpose>,
    pub block_mode: BlockMode,
    pub padding: Padding,
    /// When `false`, the caller supplies the IV at init time.
    pub randomized_encryption_required: bool,
    pub user_authentication: UserAuthentication,
}

impl KeyPolicy {
    /// AES-256-GCM, encrypt + decrypt, no padding, caller-supplied IV.
    pub fn aes_gcm() -> Self {
        Self {
            key_size_bits: KEY_LEN * 8,
            purposes: vec![KeyPurpose::Encrypt, KeyPurpose::Decrypt],
            block_mode: BlockMode::Gcm,
            padding: Padding::None,
            randomized_encryption_required: false,
            user_authentication: UserAuthentication::NotRequired,
        }
    }

    /// Require a fresh presence token for every operation.
    pub fn with_per_operation_auth(mut self, minimum: Option<AuthenticatorClass>) -> Self {
        self.user_authentication = UserAuthentication::PerOperation { minimum };
        self
    }

    pub fn requires_presence_per_operation(&self) -> bool {
        matches!(
            self.user_authentication,
            UserAuthentication::PerOperation { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// Raw symmetric key bytes held by the crate.
///
/// - Not `Clone`. Shared only through `Arc` inside a handle.
/// - Zeroised on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: [u8; KEY_LEN],
}

impl KeyMaterial {
    /// Generate fresh random key material.
    pub fn generate() -> Result<Self> {
        Ok(Self {
            bytes: crypto::generate_random_key()?,
        })
    }

    /// Copy key material out of an unwrapped buffer. The caller is
    /// responsible for zeroising `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| KeywardError::InvalidKey)?;
        Ok(Self { bytes })
    }

    /// `pub(crate)`: raw bytes never leave the crate.
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Opaque reference to symmetric key material.
///
/// Cheap to clone. Exposes no key bytes; sealing and opening happen through
/// a `CipherSession`.
#[derive(Clone)]
pub struct SymmetricKeyHandle {
    inner: HandleInner,
}

#[derive(Clone)]
enum HandleInner {
    Resident {
        alias: String,
        custody: Arc<dyn KeyCustody>,
        per_operation_auth: bool,
    },
    Software(Arc<KeyMaterial>),
}

impl SymmetricKeyHandle {
    pub(crate) fn resident(
        alias: impl Into<String>,
        custody: Arc<dyn KeyCustody>,
        policy: &KeyPolicy,
    ) -> Self {
        Self {
            inner: HandleInner::Resident {
                alias: alias.into(),
                custody,
                per_operation_auth: policy.requires_presence_per_operation(),
            },
        }
    }

    pub(crate) fn software(material: KeyMaterial) -> Self {
        Self {
            inner: HandleInner::Software(Arc::new(material)),
        }
    }

    /// Whether each operation under this key needs its own presence token.
    pub fn requires_presence(&self) -> bool {
        match &self.inner {
            HandleInner::Resident {
                per_operation_auth, ..
            } => *per_operation_auth,
            HandleInner::Software(_) => false,
        }
    }

    /// The custody alias, if the key is custody-resident.
    pub fn alias(&self) -> Option<&str> {
        match &self.inner {
            HandleInner::Resident { alias, .. } => Some(alias),
            HandleInner::Software(_) => None,
        }
    }

    pub(crate) fn begin_operation(&self) -> Result<Option<OperationChallenge>> {
        match &self.inner {
            HandleInner::Resident { alias, custody, .. } => custody.begin_operation(alias),
            HandleInner::Software(_) => Ok(None),
        }
    }

    pub(crate) fn abandon_operation(&self, challenge: OperationChallenge) -> Result<()> {
        match &self.inner {
            HandleInner::Resident { alias, custody, .. } => {
                custody.abandon_operation(alias, challenge)
            }
            HandleInner::Software(_) => Ok(()),
        }
    }

    pub(crate) fn seal(
        &self,
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
        token: Option<&PresenceToken>,
    ) -> Result<Vec<u8>> {
        match &self.inner {
            HandleInner::Resident { alias, custody, .. } => {
                custody.seal(alias, nonce, plaintext, token)
            }
            HandleInner::Software(material) => crypto::seal(material.as_bytes(), nonce, plaintext),
        }
    }

    pub(crate) fn open(
        &self,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
        token: Option<&PresenceToken>,
    ) -> Result<Vec<u8>> {
        match &self.inner {
            HandleInner::Resident { alias, custody, .. } => {
                custody.open(alias, nonce, ciphertext, token)
            }
            HandleInner::Software(material) => {
                crypto::open(material.as_bytes(), nonce, ciphertext)
            }
        }
    }
}

impl fmt::Debug for SymmetricKeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            HandleInner::Resident { alias, .. } => {
                f.debug_struct("SymmetricKeyHandle").field("alias", alias).finish()
            }
            HandleInner::Software(_) => f.write_str("SymmetricKeyHandle(<software>)"),
        }
    }
}
