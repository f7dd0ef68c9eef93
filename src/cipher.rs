//! Envelope encryption over a `KeyProvider`.
//!
//! Every encrypt or decrypt runs in its own `CipherSession`; the nonce
//! travels inside the envelope rather than in any shared cipher state, so
//! independent calls can run concurrently against the same key.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{self, NONCE_LEN};
use crate::envelope::Envelope;
use crate::error::{KeywardError, Result};
use crate::provider::KeyProvider;
use crate::session::{CipherMode, CipherSession};

/// How plaintext text is turned into bytes before sealing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// Standard UTF-8 in both directions.
    #[default]
    Utf8,
    /// Legacy single-byte mapping: each character's code point masked to one
    /// byte on encrypt (characters above U+00FF are silently truncated),
    /// each byte read back as one character on decrypt. Only for stores
    /// written by the legacy encoder.
    Latin1,
}

impl TextEncoding {
    pub fn encode(self, text: &str) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::Latin1 => text.chars().map(|c| (u32::from(c) & 0xFF) as u8).collect(),
        })
    }

    pub fn decode(self, bytes: &[u8]) -> Result<String> {
        match self {
            Self::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|_| {
                KeywardError::SerializationError("plaintext is not valid UTF-8".into())
            }),
            Self::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

/// Turns a `KeyProvider` into encrypt/decrypt over serialized envelopes.
pub struct EnvelopeCipher {
    provider: KeyProvider,
    encoding: TextEncoding,
}

impl EnvelopeCipher {
    pub fn new(provider: KeyProvider) -> Self {
        Self {
            provider,
            encoding: TextEncoding::default(),
        }
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn provider(&self) -> &KeyProvider {
        &self.provider
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Acquire the key and open an encrypt session with a fresh nonce.
    pub fn init_encryption_cipher(&self) -> Result<CipherSession> {
        let key = self.provider.get_key()?;
        let nonce = crypto::generate_nonce()?;
        CipherSession::begin(key, CipherMode::Encrypt, nonce)
    }

    /// Open a decrypt session for the nonce carried by an envelope.
    pub fn init_decryption_cipher(&self, iv: &[u8]) -> Result<CipherSession> {
        let nonce: [u8; NONCE_LEN] = iv.try_into().map_err(|_| KeywardError::InvalidNonce)?;
        let key = self.provider.get_key()?;
        CipherSession::begin(key, CipherMode::Decrypt, nonce)
    }

    /// Parse a serialized envelope. No cryptographic operation.
    pub fn get_payload(&self, serialized: &str) -> Result<Envelope> {
        Envelope::from_json(serialized)
    }

    /// Seal raw bytes in `session` and package the envelope.
    pub fn seal(&self, plaintext: &[u8], session: CipherSession) -> Result<Envelope> {
        let iv = *session.iv();
        let ciphertext = session.seal(plaintext)?;
        Ok(Envelope::new(iv, ciphertext))
    }

    /// Open raw ciphertext-with-tag in `session`.
    pub fn open(&self, ciphertext: &[u8], session: CipherSession) -> Result<Zeroizing<Vec<u8>>> {
        session.open(ciphertext).map(Zeroizing::new)
    }

    /// Encrypt `plaintext` in an already initialised session and return the
    /// serialized envelope.
    pub fn encrypt_with(&self, plaintext: &str, session: CipherSession) -> Result<String> {
        let bytes = self.encoding.encode(plaintext);
        self.seal(&bytes, session)?.to_json()
    }

    /// Encrypt `plaintext` in a fresh session.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let session = self.init_encryption_cipher()?;
        self.encrypt_with(plaintext, session)
    }

    /// Decrypt ciphertext-with-tag in an already initialised session.
    pub fn decrypt_with(&self, ciphertext: &[u8], session: CipherSession) -> Result<String> {
        let bytes = self.open(ciphertext, session)?;
        self.encoding.decode(&bytes)
    }

    /// Decrypt a serialized envelope.
    pub fn decrypt(&self, serialized: &str) -> Result<String> {
        let envelope = self.get_payload(serialized)?;
        let session = self.init_decryption_cipher(envelope.iv())?;
        self.decrypt_with(envelope.ciphertext(), session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::custody::SoftwareKeyCustody;
    use crate::provider::HardwareSymmetricKey;

    fn cipher() -> EnvelopeCipher {
        let custody = Arc::new(SoftwareKeyCustody::new().unwrap());
        EnvelopeCipher::new(HardwareSymmetricKey::new(custody, "unit").into())
    }

    #[test]
    fn test_latin1_truncates_wide_characters() {
        let bytes = TextEncoding::Latin1.encode("a\u{0141}");
        assert_eq!(&bytes[..], &[b'a', 0x41]);
    }

    #[test]
    fn test_latin1_roundtrips_single_byte_characters() {
        let text = "caf\u{e9} \u{ff}";
        let bytes = TextEncoding::Latin1.encode(text);
        assert_eq!(TextEncoding::Latin1.decode(&bytes).unwrap(), text);
    }

    #[test]
    fn test_session_mode_is_enforced() {
        let cipher = cipher();
        let session = cipher.init_decryption_cipher(&[0u8; NONCE_LEN]).unwrap();
        assert!(matches!(
            cipher.seal(b"x", session),
            Err(KeywardError::InvalidSession(_))
        ));
    }

    #[test]
    fn test_decryption_cipher_rejects_short_iv() {
        assert!(matches!(
            cipher().init_decryption_cipher(&[0u8; 8]),
            Err(KeywardError::InvalidNonce)
        ));
    }

    #[test]
    fn test_hello_envelope_shape() {
        let cipher = cipher();
        let serialized = cipher.encrypt("hello").unwrap();
        let envelope = cipher.get_payload(&serialized).unwrap();
        assert_eq!(envelope.iv().len(), 12);
        assert_eq!(envelope.ciphertext().len(), 21);
        assert_eq!(cipher.decrypt(&serialized).unwrap(), "hello");
    }
}
