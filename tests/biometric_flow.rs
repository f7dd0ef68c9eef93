mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{Scripted, SimulatedOracle};
use keyward::{
    biometric_cipher, AuthenticatorClass, BiometricGate, GateState, KeywardConfig, KeywardError,
    MemoryPreferenceStore, PreferenceStore, SoftwareKeyCustody,
};

struct Fixture {
    gate: BiometricGate,
    custody: Arc<SoftwareKeyCustody>,
    oracle: Arc<SimulatedOracle>,
    store: Arc<MemoryPreferenceStore>,
    config: KeywardConfig,
}

async fn fixture_with(
    custody: Arc<SoftwareKeyCustody>,
    oracle: SimulatedOracle,
    config: KeywardConfig,
) -> Fixture {
    let cipher = Arc::new(biometric_cipher(custody.clone(), &config).unwrap());
    let oracle = Arc::new(oracle);
    let store = Arc::new(MemoryPreferenceStore::new());
    let gate = BiometricGate::open(cipher, store.clone(), oracle.clone(), &config)
        .await
        .unwrap();
    Fixture {
        gate,
        custody,
        oracle,
        store,
        config,
    }
}

async fn fixture() -> Fixture {
    let custody = common::custody();
    let oracle = SimulatedOracle::strong(custody.presence_authority());
    fixture_with(custody, oracle, KeywardConfig::default()).await
}

async fn register(fixture: &Fixture, payload: &str) {
    fixture.oracle.push(Scripted::Succeed(AuthenticatorClass::Strong));
    let state = fixture
        .gate
        .register_user_biometrics(payload, || {})
        .await
        .unwrap();
    assert_eq!(state, GateState::Registered);
}

#[tokio::test]
async fn test_register_stores_encrypted_record() {
    let f = fixture().await;
    assert_eq!(f.gate.state(), GateState::Unregistered);
    assert!(!f.gate.is_user_registered().await.unwrap());

    let called = AtomicBool::new(false);
    f.oracle.push(Scripted::Succeed(AuthenticatorClass::Strong));
    f.gate
        .register_user_biometrics("user@example.com:secret", || {
            called.store(true, Ordering::SeqCst)
        })
        .await
        .unwrap();

    assert!(called.load(Ordering::SeqCst));
    assert!(f.gate.is_user_registered().await.unwrap());
    let record = f
        .store
        .get(&f.config.biometric_record_key)
        .await
        .unwrap()
        .unwrap();
    assert!(!record.is_empty());
    assert!(!record.contains("secret"));
}

#[tokio::test]
async fn test_cancelled_registration_leaves_nothing_behind() {
    let f = fixture().await;
    let called = AtomicBool::new(false);
    f.oracle.push(Scripted::Cancel);

    let state = f
        .gate
        .register_user_biometrics("payload", || called.store(true, Ordering::SeqCst))
        .await
        .unwrap();

    assert_eq!(state, GateState::Unregistered);
    assert!(!called.load(Ordering::SeqCst));
    assert!(!f.gate.is_user_registered().await.unwrap());
}

#[tokio::test]
async fn test_authenticate_returns_registered_payload() {
    let f = fixture().await;
    register(&f, "user@example.com:secret").await;

    let mut unlocked = None;
    f.oracle.push(Scripted::Succeed(AuthenticatorClass::Strong));
    let state = f
        .gate
        .authenticate_user("Use password", |payload| unlocked = Some(payload))
        .await
        .unwrap();

    assert_eq!(state, GateState::Unlocked);
    assert_eq!(f.gate.state(), GateState::Unlocked);
    assert_eq!(unlocked.as_deref(), Some("user@example.com:secret"));
}

#[tokio::test]
async fn test_failed_authentication_never_reveals_payload() {
    let f = fixture().await;
    register(&f, "payload").await;

    for step in [Scripted::Fail, Scripted::Cancel] {
        let mut unlocked = None;
        f.oracle.push(step);
        let state = f
            .gate
            .authenticate_user("Cancel", |payload| unlocked = Some(payload))
            .await
            .unwrap();
        assert_eq!(state, GateState::Failed);
        assert!(unlocked.is_none());
    }

    // The registration survives and can still be unlocked.
    f.oracle.push(Scripted::Succeed(AuthenticatorClass::Strong));
    let state = f.gate.authenticate_user("Cancel", |_| {}).await.unwrap();
    assert_eq!(state, GateState::Unlocked);
}

#[tokio::test]
async fn test_unanswered_prompts_leave_no_challenges() {
    let f = fixture().await;
    for _ in 0..20 {
        f.oracle.push(Scripted::Cancel);
        f.gate.register_user_biometrics("payload", || {}).await.unwrap();
    }
    assert_eq!(f.custody.outstanding_challenges(), 0);

    register(&f, "payload").await;
    for step in [Scripted::Fail, Scripted::Cancel] {
        f.oracle.push(step);
        f.gate.authenticate_user("Cancel", |_| {}).await.unwrap();
    }
    assert_eq!(f.custody.outstanding_challenges(), 0);

    // A session dropped without ever reaching the oracle.
    let cipher = biometric_cipher(f.custody.clone(), &f.config).unwrap();
    drop(cipher.init_encryption_cipher().unwrap());
    assert!(cipher.encrypt("no presence").is_err());
    assert_eq!(f.custody.outstanding_challenges(), 0);
}

#[tokio::test]
async fn test_authenticate_without_registration_skips_prompt() {
    let f = fixture().await;
    let state = f.gate.authenticate_user("Cancel", |_| {}).await.unwrap();
    assert_eq!(state, GateState::Unregistered);
    assert_eq!(f.oracle.prompts_shown(), 0);
}

#[tokio::test]
async fn test_clear_registered_user() {
    let f = fixture().await;
    register(&f, "payload").await;

    f.gate.clear_registered_user().await.unwrap();

    assert_eq!(f.gate.state(), GateState::Unregistered);
    assert!(!f.gate.is_user_registered().await.unwrap());
}

#[tokio::test]
async fn test_gate_reopens_as_registered() {
    let custody = common::custody();
    let config = KeywardConfig::default();
    let cipher = Arc::new(biometric_cipher(custody.clone(), &config).unwrap());
    let store: Arc<dyn PreferenceStore> = Arc::new(MemoryPreferenceStore::new());
    let oracle = Arc::new(SimulatedOracle::strong(custody.presence_authority()));

    let first = BiometricGate::open(cipher.clone(), store.clone(), oracle.clone(), &config)
        .await
        .unwrap();
    oracle.push(Scripted::Succeed(AuthenticatorClass::Strong));
    first.register_user_biometrics("kept", || {}).await.unwrap();

    let second = BiometricGate::open(cipher, store, oracle.clone(), &config)
        .await
        .unwrap();
    assert_eq!(second.state(), GateState::Registered);

    let mut unlocked = None;
    oracle.push(Scripted::Succeed(AuthenticatorClass::Strong));
    second
        .authenticate_user("Cancel", |payload| unlocked = Some(payload))
        .await
        .unwrap();
    assert_eq!(unlocked.as_deref(), Some("kept"));
}

#[tokio::test]
async fn test_watch_registered_follows_record() {
    let f = fixture().await;
    let watcher = f.gate.watch_registered();
    assert!(!*watcher.borrow());

    register(&f, "payload").await;
    assert!(*watcher.borrow());

    f.gate.clear_registered_user().await.unwrap();
    assert!(!*watcher.borrow());
}

#[tokio::test]
async fn test_old_platform_is_unsupported() {
    let custody = common::custody();
    let oracle = SimulatedOracle::strong(custody.presence_authority());
    let config = KeywardConfig {
        platform_level: 27,
        ..KeywardConfig::default()
    };
    let f = fixture_with(custody, oracle, config).await;

    assert!(!f.gate.is_available());
    let result = f.gate.register_user_biometrics("payload", || {}).await;
    assert!(matches!(result, Err(KeywardError::PlatformUnsupported(_))));
    assert_eq!(f.oracle.prompts_shown(), 0);
}

#[tokio::test]
async fn test_no_enrolled_authenticator_is_denied() {
    let custody = common::custody();
    let oracle = SimulatedOracle::new(custody.presence_authority(), Vec::new());
    let f = fixture_with(custody, oracle, KeywardConfig::default()).await;

    assert!(!f.gate.is_available());
    let result = f.gate.authenticate_user("Cancel", |_| {}).await;
    assert!(matches!(result, Err(KeywardError::PresenceDenied(_))));
}

#[tokio::test]
async fn test_weak_authenticator_rejected_where_strong_is_pinned() {
    let custody = common::custody();
    let oracle = SimulatedOracle::new(
        custody.presence_authority(),
        vec![AuthenticatorClass::Weak],
    );
    let f = fixture_with(custody, oracle, KeywardConfig::default()).await;

    f.oracle.push(Scripted::Succeed(AuthenticatorClass::Weak));
    let result = f.gate.register_user_biometrics("payload", || {}).await;
    assert!(matches!(result, Err(KeywardError::PresenceDenied(_))));
    assert!(!f.gate.is_user_registered().await.unwrap());
}

#[tokio::test]
async fn test_weak_authenticator_accepted_before_strength_selection() {
    let custody = common::custody();
    let oracle = SimulatedOracle::new(
        custody.presence_authority(),
        vec![AuthenticatorClass::Weak],
    );
    let config = KeywardConfig {
        platform_level: 28,
        ..KeywardConfig::default()
    };
    let f = fixture_with(custody, oracle, config).await;

    f.oracle.push(Scripted::Succeed(AuthenticatorClass::Weak));
    f.gate.register_user_biometrics("payload", || {}).await.unwrap();
    f.oracle.push(Scripted::Succeed(AuthenticatorClass::Weak));
    let state = f.gate.authenticate_user("Cancel", |_| {}).await.unwrap();
    assert_eq!(state, GateState::Unlocked);
}

#[tokio::test]
async fn test_unlock_prompt_prefers_strong_authenticators() {
    let f = fixture().await;
    register(&f, "payload").await;
    let registration_prompt = f.oracle.last_prompt().unwrap();
    assert_eq!(registration_prompt.negative_button_text, "Cancel");
    assert!(registration_prompt.confirmation_required);

    f.oracle.push(Scripted::Succeed(AuthenticatorClass::Strong));
    f.gate.authenticate_user("Use password", |_| {}).await.unwrap();

    let prompt = f.oracle.last_prompt().unwrap();
    assert_eq!(prompt.allowed_authenticators, Some(AuthenticatorClass::Strong));
    assert_eq!(prompt.negative_button_text, "Use password");
    assert!(!prompt.confirmation_required);
    assert_eq!(f.oracle.prompts_shown(), 2);
}

#[tokio::test]
async fn test_presence_bound_key_refuses_unauthorised_sessions() {
    let custody = common::custody();
    let config = KeywardConfig::default();
    let cipher = biometric_cipher(custody, &config).unwrap();

    assert!(matches!(
        cipher.encrypt("no presence"),
        Err(KeywardError::PresenceDenied(_))
    ));
}

#[tokio::test]
async fn test_biometric_cipher_needs_hardware_keys() {
    let config = KeywardConfig {
        platform_level: 22,
        ..KeywardConfig::default()
    };
    assert!(matches!(
        biometric_cipher(common::custody(), &config),
        Err(KeywardError::PlatformUnsupported(_))
    ));
}
