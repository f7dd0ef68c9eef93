//! Biometric gate.
//!
//! Binds one cipher session per operation to a presence check and keeps an
//! encrypted payload in a dedicated store. The presence oracle authorises the
//! *session*, not the ciphertext: registration seals only after a successful
//! check, and every unlock needs a new check against the same key.
//!
//! ```text
//!  Unregistered --register--> Registered --authenticate--> AuthenticationInFlight
//!        ^                        |  ^                          |          |
//!        +-------clear------------+  |                       Unlocked    Failed
//!                                    +---- authenticate again ----+--------+
//! ```

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cipher::EnvelopeCipher;
use crate::config::KeywardConfig;
use crate::error::{KeywardError, Result};
use crate::presence::{AuthenticatorClass, PresenceOracle, PresenceOutcome, PromptInfo};
use crate::provider::PlatformCapabilities;
use crate::store::PreferenceStore;

/// Where the gate stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Unregistered,
    Registered,
    AuthenticationInFlight,
    Unlocked,
    Failed,
}

/// Resets the state to `Registered` if an authentication flow is dropped
/// while the prompt is pending.
struct InFlight<'a> {
    state: &'a Mutex<GateState>,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Ok(mut state) = self.state.lock() {
                *state = GateState::Registered;
            }
        }
    }
}

pub struct BiometricGate {
    cipher: Arc<EnvelopeCipher>,
    store: Arc<dyn PreferenceStore>,
    oracle: Arc<dyn PresenceOracle>,
    capabilities: PlatformCapabilities,
    record_key: String,
    state: Mutex<GateState>,
    /// Held for a whole register or authenticate flow.
    flow: tokio::sync::Mutex<()>,
}

impl BiometricGate {
    /// Build a gate over a cipher whose key requires presence per
    /// operation. The initial state reflects whether a record is stored.
    pub async fn open(
        cipher: Arc<EnvelopeCipher>,
        store: Arc<dyn PreferenceStore>,
        oracle: Arc<dyn PresenceOracle>,
        config: &KeywardConfig,
    ) -> Result<Self> {
        let gate = Self {
            cipher,
            store,
            oracle,
            capabilities: config.capabilities(),
            record_key: config.biometric_record_key.clone(),
            state: Mutex::new(GateState::Unregistered),
            flow: tokio::sync::Mutex::new(()),
        };
        if gate.is_user_registered().await? {
            gate.transition(GateState::Registered);
        }
        Ok(gate)
    }

    pub fn state(&self) -> GateState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(GateState::Failed)
    }

    fn transition(&self, next: GateState) {
        if let Ok(mut state) = self.state.lock() {
            let from = *state;
            debug!(?from, to = ?next, "gate transition");
            *state = next;
        }
    }

    /// Platform floor met and at least one authenticator class enrolled.
    pub fn is_available(&self) -> bool {
        self.capabilities.biometric_gate() && self.allowed_authenticators().is_some()
    }

    fn ensure_available(&self) -> Result<()> {
        if !self.capabilities.biometric_gate() {
            return Err(KeywardError::PlatformUnsupported(format!(
                "biometric gate needs platform level {}, have {}",
                crate::provider::BIOMETRIC_GATE_LEVEL,
                self.capabilities.level
            )));
        }
        if self.allowed_authenticators().is_none() {
            return Err(KeywardError::PresenceDenied(
                "no biometric authenticator enrolled".into(),
            ));
        }
        Ok(())
    }

    fn allowed_authenticators(&self) -> Option<AuthenticatorClass> {
        [AuthenticatorClass::Strong, AuthenticatorClass::Weak]
            .into_iter()
            .find(|class| self.oracle.can_authenticate(*class))
    }

    /// Whether a non-empty record is stored. Needs no presence check.
    pub async fn is_user_registered(&self) -> Result<bool> {
        Ok(self
            .store
            .get(&self.record_key)
            .await?
            .is_some_and(|record| !record.is_empty()))
    }

    pub fn watch_registered(&self) -> watch::Receiver<bool> {
        self.store.watch_present(&self.record_key)
    }

    /// Remove the stored record. The presence-bound key itself survives;
    /// destroy it through the cipher's provider if required.
    pub async fn clear_registered_user(&self) -> Result<()> {
        let _flow = self.flow.lock().await;
        self.store.remove(&self.record_key).await?;
        self.transition(GateState::Unregistered);
        info!("cleared biometric registration");
        Ok(())
    }

    /// Seal `payload` behind a presence check and store it.
    ///
    /// A failed or cancelled check leaves everything untouched and does not
    /// call `on_success`.
    pub async fn register_user_biometrics<F>(&self, payload: &str, on_success: F) -> Result<GateState>
    where
        F: FnOnce(),
    {
        self.ensure_available()?;
        let _flow = self.flow.lock().await;

        let session = self.cipher.init_encryption_cipher()?;
        match self.oracle.authenticate(&PromptInfo::register(), session).await {
            PresenceOutcome::Authenticated(session) => {
                let record = self.cipher.encrypt_with(payload, session)?;
                self.store.set(&self.record_key, &record).await?;
                self.transition(GateState::Registered);
                info!("biometric registration stored");
                on_success();
                Ok(GateState::Registered)
            }
            PresenceOutcome::Failed(reason) => {
                warn!(%reason, "biometric registration failed");
                Ok(self.state())
            }
            PresenceOutcome::Cancelled => {
                warn!("biometric registration cancelled");
                Ok(self.state())
            }
        }
    }

    /// Unlock the stored payload behind a fresh presence check and pass it
    /// to `on_success`.
    ///
    /// A failed or cancelled check moves the gate to `Failed` without
    /// decrypting anything.
    pub async fn authenticate_user<F>(
        &self,
        negative_button_text: &str,
        on_success: F,
    ) -> Result<GateState>
    where
        F: FnOnce(String),
    {
        self.ensure_available()?;
        let _flow = self.flow.lock().await;

        let record = match self.store.get(&self.record_key).await? {
            Some(record) if !record.is_empty() => record,
            _ => {
                debug!("no biometric registration to unlock");
                self.transition(GateState::Unregistered);
                return Ok(GateState::Unregistered);
            }
        };
        let envelope = self.cipher.get_payload(&record)?;
        let session = self.cipher.init_decryption_cipher(envelope.iv())?;
        let prompt = PromptInfo::authenticate(negative_button_text, self.allowed_authenticators());

        self.transition(GateState::AuthenticationInFlight);
        let mut in_flight = InFlight {
            state: &self.state,
            armed: true,
        };
        let outcome = self.oracle.authenticate(&prompt, session).await;
        in_flight.armed = false;

        match outcome {
            PresenceOutcome::Authenticated(session) => {
                match self.cipher.decrypt_with(envelope.ciphertext(), session) {
                    Ok(payload) => {
                        self.transition(GateState::Unlocked);
                        info!("biometric unlock succeeded");
                        on_success(payload);
                        Ok(GateState::Unlocked)
                    }
                    Err(err) => {
                        self.transition(GateState::Failed);
                        Err(err)
                    }
                }
            }
            PresenceOutcome::Failed(reason) => {
                warn!(%reason, "biometric unlock failed");
                self.transition(GateState::Failed);
                Ok(GateState::Failed)
            }
            PresenceOutcome::Cancelled => {
                warn!("biometric unlock cancelled");
                self.transition(GateState::Failed);
                Ok(GateState::Failed)
            }
        }
    }
}
