use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::TokenStoreKind;

/// Token file name in cache directory
const TOKEN_FILE: &str = "tokens.json";

/// Keychain service name
const SERVICE_NAME: &str = "eduhub";

/// Keychain account holding the serialized token pair
const KEYRING_ACCOUNT: &str = "session-tokens";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: Option<String>,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: Option<String>) -> Self {
        Self {
            access: access.into(),
            refresh,
        }
    }
}

/// Durable storage for the token pair.
///
/// Storage problems are never surfaced: a store that cannot be read behaves
/// as if nothing was saved, and failed writes are logged.
pub trait TokenStore: Send + Sync {
    /// Overwrite both tokens; readers never observe half of a pair.
    fn save(&self, tokens: &TokenPair);

    fn load(&self) -> Option<TokenPair>;

    fn clear(&self);
}

/// Build the store selected in configuration.
pub fn open(kind: TokenStoreKind, cache_dir: &Path) -> Arc<dyn TokenStore> {
    match kind {
        TokenStoreKind::File => Arc::new(FileTokenStore::new(cache_dir.to_path_buf())),
        TokenStoreKind::Keyring => Arc::new(KeyringTokenStore::new()),
        TokenStoreKind::Memory => Arc::new(MemoryTokenStore::default()),
    }
}

// ============================================================================
// File
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct TokenFile {
    #[serde(flatten)]
    tokens: TokenPair,
    saved_at: DateTime<Utc>,
}

/// Tokens in a JSON file in the cache directory.
pub struct FileTokenStore {
    cache_dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn token_path(&self) -> PathBuf {
        self.cache_dir.join(TOKEN_FILE)
    }

    fn try_load(&self) -> Result<Option<TokenPair>> {
        let path = self.token_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read token file")?;
        let file: TokenFile = serde_json::from_str(&contents).context("Failed to parse token file")?;
        debug!(saved_at = %file.saved_at, "Loaded stored tokens");
        Ok(Some(file.tokens))
    }

    /// Write to a sibling temp file and rename over the real one, so a crash
    /// mid-write leaves either the old pair or the new pair.
    fn try_save(&self, tokens: &TokenPair) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir).context("Failed to create cache directory")?;
        let file = TokenFile {
            tokens: tokens.clone(),
            saved_at: Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&file)?;

        let path = self.token_path();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).context("Failed to write token file")?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &path).context("Failed to replace token file")?;
        Ok(())
    }

    fn try_clear(&self) -> Result<()> {
        let path = self.token_path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove token file")?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .context("Failed to restrict token file permissions")
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

impl TokenStore for FileTokenStore {
    fn save(&self, tokens: &TokenPair) {
        if let Err(e) = self.try_save(tokens) {
            warn!(error = %e, "Failed to persist tokens");
        }
    }

    fn load(&self) -> Option<TokenPair> {
        match self.try_load() {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable token file");
                None
            }
        }
    }

    fn clear(&self) {
        if let Err(e) = self.try_clear() {
            warn!(error = %e, "Failed to clear stored tokens");
        }
    }
}

// ============================================================================
// Keyring
// ============================================================================

/// Tokens in the OS keychain, both in a single entry.
pub struct KeyringTokenStore {
    account: String,
}

impl KeyringTokenStore {
    pub fn new() -> Self {
        Self {
            account: KEYRING_ACCOUNT.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.account).context("Failed to create keyring entry")
    }

    fn try_load(&self) -> Result<Option<TokenPair>> {
        match self.entry()?.get_password() {
            Ok(secret) => Ok(Some(
                serde_json::from_str(&secret).context("Failed to parse tokens from keychain")?,
            )),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve tokens from keychain"),
        }
    }

    fn try_save(&self, tokens: &TokenPair) -> Result<()> {
        let secret = serde_json::to_string(tokens)?;
        self.entry()?
            .set_password(&secret)
            .context("Failed to store tokens in keychain")
    }

    fn try_clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete tokens from keychain"),
        }
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for KeyringTokenStore {
    fn save(&self, tokens: &TokenPair) {
        if let Err(e) = self.try_save(tokens) {
            warn!(error = %e, "Failed to persist tokens");
        }
    }

    fn load(&self) -> Option<TokenPair> {
        self.try_load().unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring unreadable keychain entry");
            None
        })
    }

    fn clear(&self) {
        if let Err(e) = self.try_clear() {
            warn!(error = %e, "Failed to clear stored tokens");
        }
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Process-local store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: Mutex::new(Some(tokens)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn save(&self, tokens: &TokenPair) {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = Some(tokens.clone());
    }

    fn load(&self) -> Option<TokenPair> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn clear(&self) {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
