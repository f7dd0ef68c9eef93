//! Symmetric key provisioning.
//!
//! A `KeyProvider` hands out the symmetric key an `EnvelopeCipher` seals
//! under. Which variant is used depends on the platform and is fixed for the
//! life of an installation: switching variants orphans every envelope sealed
//! under the previous key.
//!
//! - `HardwareSymmetricKey`: an AES-256 key resident in custody.
//! - `WrappedSymmetricKey`: a software AES-256 key, wrapped by an RSA pair
//!   resident in custody and persisted as a blob in application-private
//!   storage. Unwrapped on every `get_key`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::custody::KeyCustody;
use crate::error::{KeywardError, Result};
use crate::keys::{KeyMaterial, KeyPolicy, SymmetricKeyHandle};
use crate::presence::AuthenticatorClass;
use crate::wrap_spec::{AsymmetricKeySpec, AsymmetricWrapSpec};

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Lowest platform level with hardware symmetric keys and hardware-enforced
/// asymmetric key parameters.
pub const HARDWARE_KEYS_LEVEL: u32 = 23;

/// Lowest platform level on which the biometric gate operates.
pub const BIOMETRIC_GATE_LEVEL: u32 = 28;

/// Lowest platform level that lets key generation pin the authenticator
/// class.
pub const AUTHENTICATOR_STRENGTH_LEVEL: u32 = 30;

/// What the platform's key store and biometric stack can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCapabilities {
    pub level: u32,
}

impl PlatformCapabilities {
    pub fn from_level(level: u32) -> Self {
        Self { level }
    }

    pub fn hardware_symmetric_keys(&self) -> bool {
        self.level >= HARDWARE_KEYS_LEVEL
    }

    pub fn hardware_enforced_asymmetric_spec(&self) -> bool {
        self.level >= HARDWARE_KEYS_LEVEL
    }

    pub fn biometric_gate(&self) -> bool {
        self.level >= BIOMETRIC_GATE_LEVEL
    }

    pub fn authenticator_strength_selection(&self) -> bool {
        self.level >= AUTHENTICATOR_STRENGTH_LEVEL
    }
}

/// Which provisioning strategy a provider uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyProviderKind {
    HardwareSymmetricKey,
    WrappedSymmetricKey,
}

impl KeyProviderKind {
    pub fn for_platform(capabilities: &PlatformCapabilities) -> Self {
        if capabilities.hardware_symmetric_keys() {
            Self::HardwareSymmetricKey
        } else {
            Self::WrappedSymmetricKey
        }
    }
}

// ---------------------------------------------------------------------------
// Hardware symmetric key
// ---------------------------------------------------------------------------

/// AES-256-GCM key resident in custody.
pub struct HardwareSymmetricKey {
    alias: String,
    policy: KeyPolicy,
    custody: Arc<dyn KeyCustody>,
}

impl HardwareSymmetricKey {
    /// A key usable without a presence check.
    pub fn new(custody: Arc<dyn KeyCustody>, alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            policy: KeyPolicy::aes_gcm(),
            custody,
        }
    }

    /// A key that needs a fresh presence token for every operation. Where
    /// the platform supports it, only strong authenticators are accepted.
    pub fn biometric(
        custody: Arc<dyn KeyCustody>,
        alias: impl Into<String>,
        capabilities: &PlatformCapabilities,
    ) -> Self {
        let minimum = capabilities
            .authenticator_strength_selection()
            .then_some(AuthenticatorClass::Strong);
        Self {
            alias: alias.into(),
            policy: KeyPolicy::aes_gcm().with_per_operation_auth(minimum),
            custody,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn policy(&self) -> &KeyPolicy {
        &self.policy
    }

    pub fn get_key(&self) -> Result<SymmetricKeyHandle> {
        self.custody
            .generate_or_fetch_symmetric(&self.alias, &self.policy)?;
        Ok(SymmetricKeyHandle::resident(
            self.alias.clone(),
            Arc::clone(&self.custody),
            &self.policy,
        ))
    }

    pub fn clear_key(&self) -> Result<()> {
        self.custody.delete(&self.alias)
    }
}

// ---------------------------------------------------------------------------
// Wrapped symmetric key
// ---------------------------------------------------------------------------

/// Software AES-256 key wrapped by a custody-resident RSA pair.
///
/// If the RSA pair is lost, the wrapped blob is permanently unrecoverable
/// and `get_key` fails with `KeyUnavailable` instead of generating a
/// replacement.
pub struct WrappedSymmetricKey {
    custody: Arc<dyn KeyCustody>,
    wrap_spec: AsymmetricKeySpec,
    blob_path: PathBuf,
    /// Serialises first-use provisioning so two callers cannot each install
    /// a different key.
    provision: Mutex<()>,
}

impl WrappedSymmetricKey {
    pub fn new(
        custody: Arc<dyn KeyCustody>,
        wrap_spec: AsymmetricKeySpec,
        blob_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            custody,
            wrap_spec,
            blob_path: blob_path.into(),
            provision: Mutex::new(()),
        }
    }

    pub fn blob_path(&self) -> &Path {
        &self.blob_path
    }

    pub fn wrap_spec(&self) -> &AsymmetricKeySpec {
        &self.wrap_spec
    }

    pub fn get_key(&self) -> Result<SymmetricKeyHandle> {
        let _guard = self
            .provision
            .lock()
            .map_err(|_| KeywardError::KeyUnavailable("provisioning lock poisoned".into()))?;

        match read_blob(&self.blob_path)? {
            Some(blob) => self.unwrap_blob(&blob),
            None => self.provision_new(),
        }
    }

    pub fn clear_key(&self) -> Result<()> {
        let _guard = self
            .provision
            .lock()
            .map_err(|_| KeywardError::KeyUnavailable("provisioning lock poisoned".into()))?;

        match fs::remove_file(&self.blob_path) {
            Ok(()) => {
                info!(path = %self.blob_path.display(), "removed wrapped key");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn unwrap_blob(&self, blob: &[u8]) -> Result<SymmetricKeyHandle> {
        let material = self
            .custody
            .unwrap(&self.wrap_spec.alias, blob)
            .map_err(|err| {
                warn!(alias = %self.wrap_spec.alias, %err, "wrapped key unrecoverable");
                match err {
                    KeywardError::KeyUnavailable(_) => err,
                    other => KeywardError::KeyUnavailable(other.to_string()),
                }
            })?;
        Ok(SymmetricKeyHandle::software(material))
    }

    fn provision_new(&self) -> Result<SymmetricKeyHandle> {
        self.custody.generate_or_fetch_key_pair(&self.wrap_spec)?;
        let material = KeyMaterial::generate()?;
        let blob = self
            .custody
            .wrap(&self.wrap_spec.alias, material.as_bytes())?;
        write_blob(&self.blob_path, &blob)?;
        info!(path = %self.blob_path.display(), "provisioned wrapped key");
        Ok(SymmetricKeyHandle::software(material))
    }
}

fn read_blob(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(blob) => Ok(Some(blob)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(KeywardError::KeyUnavailable(format!(
            "wrapped key unreadable: {err}"
        ))),
    }
}

/// Replace the blob atomically: write a sibling temp file, then rename.
fn write_blob(path: &Path, blob: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(blob)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Symmetric key acquisition, independent of where the key lives.
pub enum KeyProvider {
    Hardware(HardwareSymmetricKey),
    Wrapped(WrappedSymmetricKey),
}

impl KeyProvider {
    /// Pick the provider variant the platform supports.
    ///
    /// `blob_path` is only used by the wrapped variant.
    pub fn for_platform(
        capabilities: &PlatformCapabilities,
        custody: Arc<dyn KeyCustody>,
        symmetric_alias: &str,
        wrap_alias: &str,
        blob_path: impl Into<PathBuf>,
    ) -> Self {
        match KeyProviderKind::for_platform(capabilities) {
            KeyProviderKind::HardwareSymmetricKey => {
                Self::Hardware(HardwareSymmetricKey::new(custody, symmetric_alias))
            }
            KeyProviderKind::WrappedSymmetricKey => {
                let spec = AsymmetricWrapSpec::for_platform(capabilities).key_spec(wrap_alias);
                Self::Wrapped(WrappedSymmetricKey::new(custody, spec, blob_path))
            }
        }
    }

    pub fn kind(&self) -> KeyProviderKind {
        match self {
            Self::Hardware(_) => KeyProviderKind::HardwareSymmetricKey,
            Self::Wrapped(_) => KeyProviderKind::WrappedSymmetricKey,
        }
    }

    /// Return the existing key, generating and installing one on first use.
    pub fn get_key(&self) -> Result<SymmetricKeyHandle> {
        match self {
            Self::Hardware(key) => key.get_key(),
            Self::Wrapped(key) => key.get_key(),
        }
    }

    /// Irreversibly destroy the key. The next `get_key` yields an unrelated
    /// key.
    pub fn clear_key(&self) -> Result<()> {
        match self {
            Self::Hardware(key) => key.clear_key(),
            Self::Wrapped(key) => key.clear_key(),
        }
    }
}

impl From<HardwareSymmetricKey> for KeyProvider {
    fn from(key: HardwareSymmetricKey) -> Self {
        Self::Hardware(key)
    }
}

impl From<WrappedSymmetricKey> for KeyProvider {
    fn from(key: WrappedSymmetricKey) -> Self {
        Self::Wrapped(key)
    }
}
