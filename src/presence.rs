//! The user-presence oracle boundary.
//!
//! The oracle renders the platform prompt, verifies the user, and hands the
//! cipher session back with a presence token attached. Prompt rendering and
//! sensor handling stay on the platform side of this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::session::CipherSession;

/// Biometric authenticator class. `Strong` satisfies a `Weak` requirement,
/// never the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AuthenticatorClass {
    Weak,
    Strong,
}

impl AuthenticatorClass {
    pub fn satisfies(self, minimum: AuthenticatorClass) -> bool {
        self >= minimum
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Weak => 1,
            Self::Strong => 2,
        }
    }
}

const REGISTER_TITLE: &str = "Register biometric";
const REGISTER_SUBTITLE: &str = "Authenticate using biometric";
const REGISTER_NEGATIVE: &str = "Cancel";
const AUTH_TITLE: &str = "Biometric login";
const AUTH_DESCRIPTION: &str = "Confirm your identity to unlock your account";

/// Metadata for one presence prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptInfo {
    pub title: String,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub negative_button_text: String,
    pub confirmation_required: bool,
    /// `None` leaves the choice of authenticator to the platform.
    pub allowed_authenticators: Option<AuthenticatorClass>,
}

impl PromptInfo {
    /// Prompt shown when enrolling a payload for biometric unlock.
    pub fn register() -> Self {
        Self {
            title: REGISTER_TITLE.to_string(),
            subtitle: Some(REGISTER_SUBTITLE.to_string()),
            description: None,
            negative_button_text: REGISTER_NEGATIVE.to_string(),
            confirmation_required: true,
            allowed_authenticators: None,
        }
    }

    /// Prompt shown when unlocking a registered payload.
    pub fn authenticate(
        negative_button_text: &str,
        allowed_authenticators: Option<AuthenticatorClass>,
    ) -> Self {
        Self {
            title: AUTH_TITLE.to_string(),
            subtitle: None,
            description: Some(AUTH_DESCRIPTION.to_string()),
            negative_button_text: negative_button_text.to_string(),
            confirmation_required: false,
            allowed_authenticators,
        }
    }
}

/// Result of one presence prompt.
#[derive(Debug)]
pub enum PresenceOutcome {
    /// The user was verified. The session carries the presence token.
    Authenticated(CipherSession),
    /// Verification failed or the platform reported an error.
    Failed(String),
    /// The prompt was dismissed, cancelled, or timed out.
    Cancelled,
}

/// External collaborator performing biometric or liveness verification.
///
/// Implementations must surface at most one prompt at a time and must
/// eventually resolve (the platform prompt has its own timeout).
#[async_trait]
pub trait PresenceOracle: Send + Sync {
    /// Whether an authenticator of `class` is enrolled and usable.
    fn can_authenticate(&self, class: AuthenticatorClass) -> bool;

    /// Show `prompt` and, on success, authorise `session` for exactly one
    /// operation.
    async fn authenticate(&self, prompt: &PromptInfo, session: CipherSession) -> PresenceOutcome;
}
