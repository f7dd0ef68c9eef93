//! Shared fixtures: a scripted presence oracle and cipher builders.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use keyward::{
    AuthenticatorClass, CipherSession, KeywardConfig, PresenceAuthority, PresenceOracle,
    PresenceOutcome, PromptInfo, SoftwareKeyCustody,
};

/// What the simulated user does at the next prompt.
#[derive(Debug, Clone, Copy)]
pub enum Scripted {
    Succeed(AuthenticatorClass),
    Fail,
    Cancel,
}

/// Presence oracle that answers prompts from a script.
pub struct SimulatedOracle {
    authority: PresenceAuthority,
    enrolled: Vec<AuthenticatorClass>,
    script: Mutex<VecDeque<Scripted>>,
    prompts: Mutex<Vec<PromptInfo>>,
    shown: AtomicUsize,
}

impl SimulatedOracle {
    pub fn new(authority: PresenceAuthority, enrolled: Vec<AuthenticatorClass>) -> Self {
        Self {
            authority,
            enrolled,
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            shown: AtomicUsize::new(0),
        }
    }

    pub fn strong(authority: PresenceAuthority) -> Self {
        Self::new(
            authority,
            vec![AuthenticatorClass::Strong, AuthenticatorClass::Weak],
        )
    }

    pub fn push(&self, step: Scripted) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn prompts_shown(&self) -> usize {
        self.shown.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<PromptInfo> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PresenceOracle for SimulatedOracle {
    fn can_authenticate(&self, class: AuthenticatorClass) -> bool {
        self.enrolled.contains(&class)
    }

    async fn authenticate(&self, prompt: &PromptInfo, session: CipherSession) -> PresenceOutcome {
        self.shown.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Scripted::Cancel);
        match step {
            Scripted::Succeed(class) => match session.challenge() {
                Some(challenge) => {
                    let token = self.authority.issue(challenge, class);
                    PresenceOutcome::Authenticated(session.authorize(token))
                }
                None => PresenceOutcome::Authenticated(session),
            },
            Scripted::Fail => PresenceOutcome::Failed("not recognised".into()),
            Scripted::Cancel => PresenceOutcome::Cancelled,
        }
    }
}

pub fn custody() -> Arc<SoftwareKeyCustody> {
    Arc::new(SoftwareKeyCustody::new().unwrap())
}

/// Config for a modern platform with the wrapped-key blob under `dir`.
pub fn config_in(dir: &Path) -> KeywardConfig {
    KeywardConfig {
        wrapped_key_path: dir.join("wrapped.key"),
        ..KeywardConfig::default()
    }
}

/// Config for a platform without hardware symmetric keys.
pub fn legacy_config_in(dir: &Path) -> KeywardConfig {
    KeywardConfig {
        platform_level: 21,
        ..config_in(dir)
    }
}
