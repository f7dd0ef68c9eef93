//! # keyward
//!
//! Envelope encryption and key custody for secrets kept on a device whose
//! filesystem is not trusted.
//!
//! Sensitive strings (session tokens, a cached login payload) are sealed with
//! AES-256-GCM under a key that never leaves custody, or under a software key
//! wrapped by a custody-resident RSA pair on platforms without hardware
//! symmetric keys. Each result is a self-describing `{iv, ciphertext}`
//! envelope. A `BiometricGate` can additionally hold one payload behind a key
//! that only works after a fresh presence check.
//!
//! ## Public API
//!
//! - [`EnvelopeCipher`] over a [`KeyProvider`] for encrypt/decrypt.
//! - [`BiometricGate`] for presence-gated registration and unlock.
//! - [`TokenStore`] for encrypted access/refresh tokens.
//! - [`KeyCustody`], [`PresenceOracle`] and [`PreferenceStore`] are the
//!   platform boundaries; [`SoftwareKeyCustody`],
//!   [`MemoryPreferenceStore`] and [`FilePreferenceStore`] implement the
//!   custody and store boundaries in-process.

pub(crate) mod crypto;
pub mod cipher;
pub mod config;
pub mod custody;
pub mod envelope;
pub mod error;
pub mod gate;
pub mod keys;
pub mod presence;
pub mod provider;
pub mod session;
pub mod store;
pub mod wrap_spec;

use std::sync::Arc;

pub use cipher::{EnvelopeCipher, TextEncoding};
pub use config::KeywardConfig;
pub use custody::{KeyCustody, SoftwareKeyCustody};
pub use envelope::Envelope;
pub use error::{KeywardError, Result};
pub use gate::{BiometricGate, GateState};
pub use keys::SymmetricKeyHandle;
pub use presence::{AuthenticatorClass, PresenceOracle, PresenceOutcome, PromptInfo};
pub use provider::{
    HardwareSymmetricKey, KeyProvider, KeyProviderKind, PlatformCapabilities, WrappedSymmetricKey,
};
pub use session::{CipherSession, PresenceAuthority, PresenceToken};
pub use store::{FilePreferenceStore, MemoryPreferenceStore, PreferenceStore, TokenStore};

/// Size of the envelope nonce in bytes.
pub const NONCE_LEN: usize = crypto::NONCE_LEN;

/// Size of the authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = crypto::TAG_LEN;

/// Install a `tracing` fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Does nothing if a subscriber is already installed.
pub fn init_logging(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .try_init();
}

/// The cipher for tokens: a hardware key where the platform has one,
/// otherwise a wrapped software key.
pub fn token_cipher(custody: Arc<dyn KeyCustody>, config: &KeywardConfig) -> EnvelopeCipher {
    let provider = KeyProvider::for_platform(
        &config.capabilities(),
        custody,
        &config.symmetric_key_alias,
        &config.wrap_key_alias,
        config.wrapped_key_path.clone(),
    );
    EnvelopeCipher::new(provider).with_encoding(config.text_encoding)
}

/// The cipher for the biometric gate: always a custody-resident key that
/// needs a fresh presence token for every operation.
pub fn biometric_cipher(
    custody: Arc<dyn KeyCustody>,
    config: &KeywardConfig,
) -> Result<EnvelopeCipher> {
    let capabilities = config.capabilities();
    if !capabilities.hardware_symmetric_keys() {
        return Err(KeywardError::PlatformUnsupported(
            "presence-bound keys need hardware symmetric key support".into(),
        ));
    }
    let key = HardwareSymmetricKey::biometric(custody, &config.biometric_key_alias, &capabilities);
    Ok(EnvelopeCipher::new(key.into()).with_encoding(config.text_encoding))
}
