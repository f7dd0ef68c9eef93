//! Cipher sessions and presence tokens.
//!
//! A `CipherSession` binds one key handle, one mode and one nonce for the
//! duration of a single encrypt or decrypt call. It is consumed by use, so a
//! nonce can never be sealed under twice through the same session.
//!
//! For keys that require presence per operation, custody hands out an
//! `OperationChallenge` when the session is created. The presence oracle
//! answers it with a `PresenceToken`, an HMAC-SHA256 tag over the challenge,
//! the authenticator class and the issue time, keyed by a secret shared
//! between the oracle side (`PresenceAuthority`) and custody.

use std::fmt;

use chrono::{DateTime, Utc};
use ring::hmac;
use ring::rand::SystemRandom;
use serde::{Deserialize, Serialize};

use crate::crypto::NONCE_LEN;
use crate::error::{KeywardError, Result};
use crate::keys::SymmetricKeyHandle;
use crate::presence::AuthenticatorClass;

/// Direction of a cipher session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    Encrypt,
    Decrypt,
}

/// Single-use challenge issued by custody for one authenticated operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationChallenge(u64);

impl OperationChallenge {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Presence tokens
// ---------------------------------------------------------------------------

/// Proof that the user was verified for one specific operation.
///
/// Only a `PresenceAuthority` can mint one.
#[derive(Clone, PartialEq, Eq)]
pub struct PresenceToken {
    challenge: OperationChallenge,
    class: AuthenticatorClass,
    issued_at: DateTime<Utc>,
    tag: Vec<u8>,
}

impl PresenceToken {
    pub fn challenge(&self) -> OperationChallenge {
        self.challenge
    }

    pub fn class(&self) -> AuthenticatorClass {
        self.class
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

impl fmt::Debug for PresenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceToken")
            .field("challenge", &self.challenge)
            .field("class", &self.class)
            .field("issued_at", &self.issued_at)
            .finish_non_exhaustive()
    }
}

fn token_message(
    challenge: OperationChallenge,
    class: AuthenticatorClass,
    issued_at: DateTime<Utc>,
) -> [u8; 17] {
    let mut msg = [0u8; 17];
    msg[..8].copy_from_slice(&challenge.value().to_be_bytes());
    msg[8] = class.code();
    msg[9..].copy_from_slice(&issued_at.timestamp_millis().to_be_bytes());
    msg
}

/// Mints and verifies presence tokens.
#[derive(Clone)]
pub struct PresenceAuthority {
    key: hmac::Key,
}

impl PresenceAuthority {
    /// Create an authority with a fresh random MAC key.
    pub fn generate() -> Result<Self> {
        let key = hmac::Key::generate(hmac::HMAC_SHA256, &SystemRandom::new())
            .map_err(|_| KeywardError::RandomnessFailure)?;
        Ok(Self { key })
    }

    /// Issue a token answering `challenge` after the user was verified with
    /// an authenticator of `class`.
    pub fn issue(&self, challenge: OperationChallenge, class: AuthenticatorClass) -> PresenceToken {
        self.issue_at(challenge, class, Utc::now())
    }

    pub(crate) fn issue_at(
        &self,
        challenge: OperationChallenge,
        class: AuthenticatorClass,
        issued_at: DateTime<Utc>,
    ) -> PresenceToken {
        let tag = hmac::sign(&self.key, &token_message(challenge, class, issued_at));
        PresenceToken {
            challenge,
            class,
            issued_at,
            tag: tag.as_ref().to_vec(),
        }
    }

    /// Check that `token` was minted by this authority and not altered.
    pub fn verify(&self, token: &PresenceToken) -> Result<()> {
        let msg = token_message(token.challenge, token.class, token.issued_at);
        hmac::verify(&self.key, &msg, &token.tag)
            .map_err(|_| KeywardError::PresenceDenied("presence token did not verify".into()))
    }
}

impl fmt::Debug for PresenceAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PresenceAuthority(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Transient binding of a key, a mode and a nonce for exactly one operation.
pub struct CipherSession {
    key: SymmetricKeyHandle,
    mode: CipherMode,
    nonce: [u8; NONCE_LEN],
    challenge: Option<OperationChallenge>,
    token: Option<PresenceToken>,
}

impl CipherSession {
    /// Bind `key` to `mode` and `nonce`, requesting a challenge from custody
    /// if the key needs presence per operation.
    pub(crate) fn begin(
        key: SymmetricKeyHandle,
        mode: CipherMode,
        nonce: [u8; NONCE_LEN],
    ) -> Result<Self> {
        let challenge = key.begin_operation()?;
        Ok(Self {
            key,
            mode,
            nonce,
            challenge,
            token: None,
        })
    }

    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    /// The nonce realised for this session.
    pub fn iv(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// The challenge the presence oracle must answer, if any.
    pub fn challenge(&self) -> Option<OperationChallenge> {
        self.challenge
    }

    pub fn requires_presence(&self) -> bool {
        self.key.requires_presence()
    }

    pub fn is_authorized(&self) -> bool {
        !self.requires_presence() || self.token.is_some()
    }

    /// Attach the token produced by a successful presence check.
    pub fn authorize(mut self, token: PresenceToken) -> Self {
        self.token = Some(token);
        self
    }

    pub(crate) fn seal(self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.mode != CipherMode::Encrypt {
            return Err(KeywardError::InvalidSession("session is in decrypt mode"));
        }
        self.key.seal(&self.nonce, plaintext, self.token.as_ref())
    }

    pub(crate) fn open(self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if self.mode != CipherMode::Decrypt {
            return Err(KeywardError::InvalidSession("session is in encrypt mode"));
        }
        self.key.open(&self.nonce, ciphertext, self.token.as_ref())
    }
}

// An unused session gives its challenge back so custody does not accumulate
// challenges from cancelled prompts.
impl Drop for CipherSession {
    fn drop(&mut self) {
        if let Some(challenge) = self.challenge.take() {
            let _ = self.key.abandon_operation(challenge);
        }
    }
}

impl fmt::Debug for CipherSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherSession")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("challenge", &self.challenge)
            .field("authorized", &self.token.is_some())
            .finish_non_exhaustive()
    }
}
