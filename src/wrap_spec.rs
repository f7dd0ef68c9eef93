//! Generation parameters for the asymmetric key pair that wraps software
//! symmetric keys on platforms without hardware symmetric-key support.
//!
//! Both variants describe a 2048-bit RSA pair restricted to encrypt/decrypt
//! with PKCS#1 v1.5 padding in ECB mode. ECB and non-randomised encryption
//! are acceptable because the only plaintext ever wrapped is a freshly
//! generated 32-byte key. Older key stores also need a self-signed
//! certificate around the pair, which the legacy variant describes.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::keys::{BlockMode, KeyPolicy, KeyPurpose, Padding, UserAuthentication};
use crate::provider::PlatformCapabilities;

/// RSA modulus size for the wrapping pair.
pub const WRAP_KEY_BITS: usize = 2048;

/// Serial number stamped on the legacy self-signed certificate.
pub const LEGACY_CERT_SERIAL: u64 = 10;

/// Validity of the legacy self-signed certificate.
const LEGACY_CERT_VALIDITY_MONTHS: u32 = 12 * 10;

/// Self-signed certificate envelope required by legacy key stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateEnvelope {
    pub subject: String,
    pub serial_number: u64,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// Complete generation request for an asymmetric wrapping pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsymmetricKeySpec {
    pub alias: String,
    pub policy: KeyPolicy,
    pub certificate: Option<CertificateEnvelope>,
}

/// Which flavour of generation parameters the platform understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AsymmetricWrapSpec {
    /// Hardware-enforced key parameters.
    HardwareEnforced,
    /// Certificate-based parameters for older key stores.
    LegacyCertificate,
}

impl AsymmetricWrapSpec {
    pub fn for_platform(capabilities: &PlatformCapabilities) -> Self {
        if capabilities.hardware_enforced_asymmetric_spec() {
            Self::HardwareEnforced
        } else {
            Self::LegacyCertificate
        }
    }

    /// Build the generation request for `alias`.
    pub fn key_spec(&self, alias: &str) -> AsymmetricKeySpec {
        let certificate = match self {
            Self::HardwareEnforced => None,
            Self::LegacyCertificate => Some(legacy_certificate(alias, Utc::now())),
        };
        AsymmetricKeySpec {
            alias: alias.to_string(),
            policy: wrap_policy(),
            certificate,
        }
    }
}

fn wrap_policy() -> KeyPolicy {
    KeyPolicy {
        key_size_bits: WRAP_KEY_BITS,
        purposes: vec![KeyPurpose::Encrypt, KeyPurpose::Decrypt],
        block_mode: BlockMode::Ecb,
        padding: Padding::RsaPkcs1,
        randomized_encryption_required: false,
        user_authentication: UserAuthentication::DeviceSession,
    }
}

fn legacy_certificate(alias: &str, now: DateTime<Utc>) -> CertificateEnvelope {
    // Overflow is only possible at the very end of chrono's range.
    let not_after = now
        .checked_add_months(Months::new(LEGACY_CERT_VALIDITY_MONTHS))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    CertificateEnvelope {
        subject: format!("CN={alias}"),
        serial_number: LEGACY_CERT_SERIAL,
        not_before: now,
        not_after,
    }
}
