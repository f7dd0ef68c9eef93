//! String key-value preference stores.
//!
//! The crate treats persistence as an opaque async store of string values.
//! Each store also publishes, per key, whether a non-empty value is present;
//! that signal backs "is a user registered" without decrypting anything.
//!
//! `TokenStore` layers envelope encryption over a dedicated store for the
//! session's access and refresh tokens.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::debug;

use crate::cipher::EnvelopeCipher;
use crate::config::KeywardConfig;
use crate::error::{KeywardError, Result};

/// Async store of one string value per key.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every key.
    async fn clear(&self) -> Result<()>;

    /// Subscribe to "is the value under `key` present and non-empty".
    fn watch_present(&self, key: &str) -> watch::Receiver<bool>;
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| KeywardError::Storage("store lock poisoned".into()))
}

fn is_present(value: Option<&String>) -> bool {
    value.is_some_and(|v| !v.is_empty())
}

/// In-memory values plus the per-key presence channels shared by both
/// store implementations.
#[derive(Default)]
struct Values {
    entries: Mutex<BTreeMap<String, String>>,
    watchers: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl Values {
    fn from_entries(entries: BTreeMap<String, String>) -> Self {
        Self {
            entries: Mutex::new(entries),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries)?.get(key).cloned())
    }

    fn snapshot(&self) -> Result<BTreeMap<String, String>> {
        Ok(lock(&self.entries)?.clone())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.entries)?.insert(key.to_string(), value.to_string());
        self.publish(key, !value.is_empty())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.entries)?.remove(key);
        self.publish(key, false)
    }

    fn clear(&self) -> Result<()> {
        lock(&self.entries)?.clear();
        for sender in lock(&self.watchers)?.values() {
            sender.send_replace(false);
        }
        Ok(())
    }

    fn publish(&self, key: &str, present: bool) -> Result<()> {
        if let Some(sender) = lock(&self.watchers)?.get(key) {
            sender.send_replace(present);
        }
        Ok(())
    }

    fn watch(&self, key: &str) -> watch::Receiver<bool> {
        let present = self
            .entries
            .lock()
            .map(|entries| is_present(entries.get(key)))
            .unwrap_or(false);
        match self.watchers.lock() {
            Ok(mut watchers) => watchers
                .entry(key.to_string())
                .or_insert_with(|| watch::channel(present).0)
                .subscribe(),
            // A poisoned registry still yields a receiver with the current
            // value; it just never updates.
            Err(_) => watch::channel(present).1,
        }
    }
}

// ---------------------------------------------------------------------------
// Memory store
// ---------------------------------------------------------------------------

/// Ephemeral store, for tests and sessions that must not touch disk.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    values: Values,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.values.get(key)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.set(key, value)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.remove(key)
    }

    async fn clear(&self) -> Result<()> {
        self.values.clear()
    }

    fn watch_present(&self, key: &str) -> watch::Receiver<bool> {
        self.values.watch(key)
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// Store persisted as one JSON object per file.
///
/// Values are cached in memory; every mutation rewrites the file through a
/// temp file and rename, serialised by a write lock.
pub struct FilePreferenceStore {
    path: PathBuf,
    values: Values,
    write_lock: tokio::sync::Mutex<()>,
}

impl FilePreferenceStore {
    /// Open the store at `path`, creating it empty if absent.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), keys = entries.len(), "opened preference store");
        Ok(Self {
            path,
            values: Values::from_entries(entries),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `entries` through a synced temp file and rename. In-memory
    /// values and watchers are only updated after this succeeds.
    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let text = serde_json::to_string_pretty(entries)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(text.as_bytes()).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for FilePreferenceStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.values.get(key)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.values.snapshot()?;
        next.insert(key.to_string(), value.to_string());
        self.persist(&next).await?;
        self.values.set(key, value)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.values.snapshot()?;
        if next.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&next).await?;
        self.values.remove(key)
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.persist(&BTreeMap::new()).await?;
        self.values.clear()
    }

    fn watch_present(&self, key: &str) -> watch::Receiver<bool> {
        self.values.watch(key)
    }
}

// ---------------------------------------------------------------------------
// Token store
// ---------------------------------------------------------------------------

/// Encrypted access and refresh tokens in a dedicated store.
pub struct TokenStore {
    store: Arc<dyn PreferenceStore>,
    cipher: Arc<EnvelopeCipher>,
    access_key: String,
    refresh_key: String,
}

impl TokenStore {
    pub fn new(
        store: Arc<dyn PreferenceStore>,
        cipher: Arc<EnvelopeCipher>,
        config: &KeywardConfig,
    ) -> Self {
        Self {
            store,
            cipher,
            access_key: config.access_token_key.clone(),
            refresh_key: config.refresh_token_key.clone(),
        }
    }

    /// Encrypt and save whichever tokens are given; absent ones are left
    /// untouched.
    pub async fn save_access_tokens(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<()> {
        if let Some(token) = access_token {
            let sealed = self.cipher.encrypt(token)?;
            self.store.set(&self.access_key, &sealed).await?;
        }
        if let Some(token) = refresh_token {
            let sealed = self.cipher.encrypt(token)?;
            self.store.set(&self.refresh_key, &sealed).await?;
        }
        Ok(())
    }

    pub async fn access_token(&self) -> Result<Option<String>> {
        self.read(&self.access_key).await
    }

    pub async fn refresh_token(&self) -> Result<Option<String>> {
        self.read(&self.refresh_key).await
    }

    /// Drop every value in the underlying store.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        match self.store.get(key).await? {
            Some(sealed) => self.cipher.decrypt(&sealed).map(Some),
            None => Ok(None),
        }
    }
}
