//! Runtime configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cipher::TextEncoding;
use crate::error::Result;
use crate::provider::PlatformCapabilities;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywardConfig {
    /// Custody alias of the token-encryption key.
    pub symmetric_key_alias: String,
    /// Custody alias of the presence-bound key.
    pub biometric_key_alias: String,
    /// Custody alias of the RSA pair that wraps software keys.
    pub wrap_key_alias: String,
    /// Application-private file holding the wrapped key blob.
    pub wrapped_key_path: PathBuf,
    pub biometric_record_key: String,
    pub access_token_key: String,
    pub refresh_token_key: String,
    pub text_encoding: TextEncoding,
    pub platform_level: u32,
}

impl Default for KeywardConfig {
    fn default() -> Self {
        Self {
            symmetric_key_alias: "KEYWARD_AES".to_string(),
            biometric_key_alias: "KEYWARD_BIOMETRIC".to_string(),
            wrap_key_alias: "KEYWARD_RSA".to_string(),
            wrapped_key_path: PathBuf::from("keyward_wrapped.key"),
            biometric_record_key: "user_biometric_data".to_string(),
            access_token_key: "key_access_token".to_string(),
            refresh_token_key: "key_refresh_token".to_string(),
            text_encoding: TextEncoding::Utf8,
            platform_level: 34,
        }
    }
}

impl KeywardConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn capabilities(&self) -> PlatformCapabilities {
        PlatformCapabilities::from_level(self.platform_level)
    }
}
