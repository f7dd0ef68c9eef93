mod common;

use std::sync::Arc;

use keyward::{
    token_cipher, FilePreferenceStore, KeywardConfig, MemoryPreferenceStore, PreferenceStore,
    SoftwareKeyCustody, TokenStore,
};

fn tokens_over(
    store: Arc<dyn PreferenceStore>,
    custody: Arc<SoftwareKeyCustody>,
    config: &KeywardConfig,
) -> TokenStore {
    TokenStore::new(store, Arc::new(token_cipher(custody, config)), config)
}

#[tokio::test]
async fn test_tokens_absent_until_saved() {
    let config = KeywardConfig::default();
    let tokens = tokens_over(
        Arc::new(MemoryPreferenceStore::new()),
        common::custody(),
        &config,
    );
    assert_eq!(tokens.access_token().await.unwrap(), None);
    assert_eq!(tokens.refresh_token().await.unwrap(), None);
}

#[tokio::test]
async fn test_save_and_read_tokens() {
    let config = KeywardConfig::default();
    let store = Arc::new(MemoryPreferenceStore::new());
    let tokens = tokens_over(store.clone(), common::custody(), &config);

    tokens
        .save_access_tokens(Some("access-1"), Some("refresh-1"))
        .await
        .unwrap();
    assert_eq!(tokens.access_token().await.unwrap().as_deref(), Some("access-1"));
    assert_eq!(tokens.refresh_token().await.unwrap().as_deref(), Some("refresh-1"));

    // Stored values are envelopes, not the tokens themselves.
    let raw = store.get(&config.access_token_key).await.unwrap().unwrap();
    assert!(!raw.contains("access-1"));
    assert!(raw.contains("\"iv\""));
}

#[tokio::test]
async fn test_partial_save_keeps_other_token() {
    let config = KeywardConfig::default();
    let tokens = tokens_over(
        Arc::new(MemoryPreferenceStore::new()),
        common::custody(),
        &config,
    );
    tokens
        .save_access_tokens(Some("access-1"), Some("refresh-1"))
        .await
        .unwrap();
    tokens.save_access_tokens(Some("access-2"), None).await.unwrap();

    assert_eq!(tokens.access_token().await.unwrap().as_deref(), Some("access-2"));
    assert_eq!(tokens.refresh_token().await.unwrap().as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn test_file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::config_in(dir.path());
    let custody = common::custody();
    let path = dir.path().join("user_prefs.json");

    let store = Arc::new(FilePreferenceStore::open(&path).await.unwrap());
    tokens_over(store, custody.clone(), &config)
        .save_access_tokens(Some("access"), Some("refresh"))
        .await
        .unwrap();

    let reopened = Arc::new(FilePreferenceStore::open(&path).await.unwrap());
    let tokens = tokens_over(reopened, custody, &config);
    assert_eq!(tokens.access_token().await.unwrap().as_deref(), Some("access"));
    assert_eq!(tokens.refresh_token().await.unwrap().as_deref(), Some("refresh"));
}

#[tokio::test]
async fn test_wrapped_key_tokens_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::legacy_config_in(dir.path());
    let custody = common::custody();
    let path = dir.path().join("user_prefs.json");

    let store = Arc::new(FilePreferenceStore::open(&path).await.unwrap());
    tokens_over(store, custody.clone(), &config)
        .save_access_tokens(Some("legacy-access"), None)
        .await
        .unwrap();

    let reopened = Arc::new(FilePreferenceStore::open(&path).await.unwrap());
    let tokens = tokens_over(reopened, custody, &config);
    assert_eq!(
        tokens.access_token().await.unwrap().as_deref(),
        Some("legacy-access")
    );
}

#[tokio::test]
async fn test_clear_removes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::config_in(dir.path());
    let path = dir.path().join("user_prefs.json");
    let store = Arc::new(FilePreferenceStore::open(&path).await.unwrap());
    let tokens = tokens_over(store, common::custody(), &config);

    tokens
        .save_access_tokens(Some("access"), Some("refresh"))
        .await
        .unwrap();
    tokens.clear().await.unwrap();

    assert_eq!(tokens.access_token().await.unwrap(), None);
    let reopened = FilePreferenceStore::open(&path).await.unwrap();
    assert_eq!(reopened.get(&config.refresh_token_key).await.unwrap(), None);
}
