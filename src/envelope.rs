//! The serialized `{iv, ciphertext}` envelope.
//!
//! Wire format is a JSON object with two binary fields:
//!
//! ```text
//! { "iv": "<base64, 12 bytes>", "ciphertext": "<base64, len(plaintext) + 16>" }
//! ```
//!
//! There is no version field; integrity comes solely from the GCM tag
//! carried at the end of `ciphertext`. Readers also accept the legacy form
//! where each binary field is a JSON array of signed bytes.

use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::crypto::{NONCE_LEN, TAG_LEN};
use crate::error::{KeywardError, Result};

/// One authenticated-encryption result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(with = "binary")]
    iv: Vec<u8>,
    #[serde(with = "binary")]
    ciphertext: Vec<u8>,
}

impl Envelope {
    pub fn new(iv: [u8; NONCE_LEN], ciphertext: Vec<u8>) -> Self {
        Self {
            iv: iv.to_vec(),
            ciphertext,
        }
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Ciphertext with the 16-byte tag appended.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an envelope without any cryptographic operation.
    pub fn from_json(serialized: &str) -> Result<Self> {
        let envelope: Self = serde_json::from_str(serialized)?;
        if envelope.iv.len() != NONCE_LEN {
            return Err(KeywardError::SerializationError(format!(
                "iv must be {NONCE_LEN} bytes, got {}",
                envelope.iv.len()
            )));
        }
        if envelope.ciphertext.len() < TAG_LEN {
            return Err(KeywardError::SerializationError(
                "ciphertext shorter than the authentication tag".into(),
            ));
        }
        Ok(envelope)
    }
}

mod binary {
    use super::STANDARD;
    use base64::Engine;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Base64(String),
        Legacy(Vec<i16>),
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Base64(text) => STANDARD.decode(text).map_err(D::Error::custom),
            // Signed (-128..=127) as written by the legacy encoder, or
            // unsigned (0..=255).
            Repr::Legacy(values) => values
                .into_iter()
                .map(|v| match v {
                    -128..=-1 => Ok((v + 256) as u8),
                    0..=255 => Ok(v as u8),
                    _ => Err(D::Error::custom(format!("byte value out of range: {v}"))),
                })
                .collect(),
        }
    }
}
