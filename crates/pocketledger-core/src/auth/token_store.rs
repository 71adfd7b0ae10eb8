//! Durable storage for the bearer token.
//!
//! Exactly one credential is kept per backend. It is present while the
//! user is signed in and removed on logout or when verification fails.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};

/// Token file name in the data directory
const TOKEN_FILE: &str = "token.json";

/// Keychain service name
const SERVICE_NAME: &str = "pocketledger";

/// Keychain account the token is filed under
const KEYRING_ACCOUNT: &str = "api-token";

pub trait TokenStore: Send {
    /// Read the stored token, `None` when nothing is stored
    fn load(&self) -> Result<Option<String>>;

    /// Replace the stored token
    fn save(&mut self, token: &str) -> Result<()>;

    /// Remove the stored token. Clearing an empty store succeeds.
    fn clear(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenRecord {
    token: String,
    stored_at: DateTime<Utc>,
}

/// Token kept as JSON in a file under the data directory.
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(TOKEN_FILE)
    }

    fn read_record(path: &Path) -> Result<TokenRecord> {
        let contents = std::fs::read_to_string(path).context("Failed to read token file")?;
        serde_json::from_str(&contents).context("Failed to parse token file")
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<String>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let record = Self::read_record(&path)?;
        if record.token.is_empty() {
            return Ok(None);
        }
        Ok(Some(record.token))
    }

    fn save(&mut self, token: &str) -> Result<()> {
        let path = self.path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create token directory")?;
        }
        let record = TokenRecord {
            token: token.to_string(),
            stored_at: Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&record)?;

        // Tighten an existing file before the new token lands in it.
        if path.exists() {
            restrict_permissions(&path)?;
        }
        let mut file = open_private(&path).context("Failed to open token file")?;
        file.write_all(contents.as_bytes()).context("Failed to write token file")?;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove token file")?;
        }
        Ok(())
    }
}

/// Open for writing, creating the file owner-only so the token is never
/// readable by others, not even briefly.
fn open_private(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
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

/// Token kept in the OS keychain.
pub struct KeyringTokenStore {
    account: String,
}

impl KeyringTokenStore {
    pub fn new() -> Self {
        Self::with_account(KEYRING_ACCOUNT)
    }

    /// Use a separate keychain slot, e.g. one per API server
    pub fn with_account(account: &str) -> Self {
        Self {
            account: account.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.account).context("Failed to create keyring entry")
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for KeyringTokenStore {
    fn load(&self) -> Result<Option<String>> {
        match self.entry()?.get_password() {
            Ok(token) if token.is_empty() => Ok(None),
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve token from keychain"),
        }
    }

    fn save(&mut self, token: &str) -> Result<()> {
        self.entry()?
            .set_password(token)
            .context("Failed to store token in keychain")
    }

    fn clear(&mut self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}

/// In-process store. Clones share the same slot, so a caller can hand one
/// clone to a `SessionStore` and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(token.to_string()))),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>> {
        self.slot
            .lock()
            .map_err(|_| anyhow::anyhow!("Token store lock poisoned"))
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.lock()?.clone())
    }

    fn save(&mut self, token: &str) -> Result<()> {
        *self.lock()? = Some(token.to_string());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        *self.lock()? = None;
        Ok(())
    }
}

impl TokenStore for Box<dyn TokenStore> {
    fn load(&self) -> Result<Option<String>> {
        (**self).load()
    }

    fn save(&mut self, token: &str) -> Result<()> {
        (**self).save(token)
    }

    fn clear(&mut self) -> Result<()> {
        (**self).clear()
    }
}
