//! Low-level cryptographic operations.
//!
//! This module and `session` are the only places in the crate that import
//! `ring` directly. Everything else seals and opens through the functions
//! exposed here or through a `KeyCustody` implementation.
//!
//! Primitive choices:
//! - **Cipher**: AES-256-GCM (authenticated encryption)
//! - **Nonce**: 96-bit (12 bytes), drawn fresh per session via `SystemRandom`
//! - **Tag**: 128-bit, appended to the ciphertext
//! - **Key size**: 256 bits (32 bytes)

use ring::aead::{self, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use crate::error::{KeywardError, Result};

/// The AEAD algorithm used throughout keyward.
const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of the GCM authentication tag in bytes (128 bits).
pub const TAG_LEN: usize = 16;

/// Size of a symmetric key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Draw a fresh random nonce for one encryption session.
///
/// There is no nonce caching or counter-based generation: each session owns
/// the nonce it was initialised with, so concurrent sessions never share
/// mutable cipher state.
pub fn generate_nonce() -> Result<[u8; NONCE_LEN]> {
    let rng = SystemRandom::new();
    let mut buf = [0u8; NONCE_LEN];
    rng.fill(&mut buf)
        .map_err(|_| KeywardError::RandomnessFailure)?;
    Ok(buf)
}

fn bind_key(key_bytes: &[u8; KEY_LEN]) -> Result<LessSafeKey> {
    let unbound = UnboundKey::new(ALGORITHM, key_bytes).map_err(|_| KeywardError::InvalidKey)?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt `plaintext` under `key_bytes` with the caller's nonce.
///
/// Returns the ciphertext with the GCM tag appended:
/// ```text
/// [ ciphertext (plaintext.len()) ][ tag (16 bytes) ]
/// ```
pub fn seal(
    key_bytes: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let key = bind_key(key_bytes)?;

    let mut output = Vec::with_capacity(plaintext.len() + TAG_LEN);
    output.extend_from_slice(plaintext);

    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(*nonce),
        aead::Aad::empty(),
        &mut output,
    )
    .map_err(|_| KeywardError::EncryptionFailure)?;

    Ok(output)
}

/// Decrypt ciphertext-with-tag produced by [`seal`].
///
/// If the key is wrong or the ciphertext has been tampered with, the tag
/// check fails and the caller receives no partial plaintext.
pub fn open(
    key_bytes: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_LEN {
        return Err(KeywardError::AuthenticationFailure);
    }

    let key = bind_key(key_bytes)?;
    let mut buffer = Zeroizing::new(ciphertext.to_vec());

    let plaintext = key
        .open_in_place(
            Nonce::assume_unique_for_key(*nonce),
            aead::Aad::empty(),
            buffer.as_mut_slice(),
        )
        .map_err(|_| KeywardError::AuthenticationFailure)?;

    Ok(plaintext.to_vec())
}

/// Generate a cryptographically secure random 256-bit key.
pub fn generate_random_key() -> Result<[u8; KEY_LEN]> {
    let rng = SystemRandom::new();
    let mut key = [0u8; KEY_LEN];
    rng.fill(&mut key)
        .map_err(|_| KeywardError::RandomnessFailure)?;
    Ok(key)
}
