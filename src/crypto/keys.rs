//! Long-lived X25519 key pairs and public-key lookup.
//!
//! Keys are stored on disk as a single line of base64 text. Public keys of
//! principals are pinned out-of-band: a [`DirectoryKeyStore`] reads them from
//! `<dir>/<principal>.pub`.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, warn};
use x25519_dalek::{SharedSecret, StaticSecret};

use crate::channel::base64::{decode, encode};
use crate::crypto::{CryptoContext, KEY_LEN};
use crate::error::{constants, ProtocolError, Result};

/// File extension of public key files inside a key directory
pub const PUBLIC_KEY_EXTENSION: &str = "pub";

fn key_from_base64(text: &str, what: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = decode(text.trim().as_bytes())?;
    <[u8; KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
        ProtocolError::ConfigError(format!("{what} must be {KEY_LEN} bytes, got {}", bytes.len()))
    })
}

fn read_key_file(path: &Path, what: &str) -> Result<[u8; KEY_LEN]> {
    let text = fs::read_to_string(path).map_err(|e| {
        ProtocolError::ConfigError(format!("Failed to read {what} '{}': {e}", path.display()))
    })?;
    key_from_base64(&text, what)
}

/// Private half of a principal's key pair.
#[derive(Clone)]
pub struct PrivateKey(StaticSecret);

impl PrivateKey {
    pub fn generate(ctx: &CryptoContext) -> Result<Self> {
        Ok(Self::from_bytes(ctx.random_array()?))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    pub fn to_base64(&self) -> String {
        encode(&self.0.to_bytes())
    }

    pub fn from_base64(text: &str) -> Result<Self> {
        Ok(Self::from_bytes(key_from_base64(text, "private key")?))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_bytes(read_key_file(path.as_ref(), "private key")?))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_base64()).map_err(|e| {
            ProtocolError::ConfigError(format!("Failed to write private key: {e}"))
        })
    }

    pub(crate) fn diffie_hellman(&self, public: &PublicKey) -> SharedSecret {
        self.0.diffie_hellman(&public.0)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(public={})", self.public_key().to_base64())
    }
}

/// Public half of a principal's key pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PublicKey(x25519_dalek::PublicKey);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        self.0.as_bytes()
    }

    pub fn to_base64(&self) -> String {
        encode(self.0.as_bytes())
    }

    pub fn from_base64(text: &str) -> Result<Self> {
        Ok(Self::from_bytes(key_from_base64(text, "public key")?))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_bytes(read_key_file(path.as_ref(), "public key")?))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_base64()).map_err(|e| {
            ProtocolError::ConfigError(format!("Failed to write public key: {e}"))
        })
    }
}

/// Maps a principal name to its pinned public key.
pub trait KeyStore: Send + Sync {
    /// Returns `HandshakeError` when no key is on file for `principal`.
    fn public_key(&self, principal: &str) -> Result<PublicKey>;
}

/// Reject names that could escape a key directory or break the wire format.
pub fn validate_principal(principal: &str) -> Result<()> {
    let bad = principal.is_empty()
        || principal.len() > 64
        || principal.starts_with('.')
        || principal
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == '\\' || c.is_control());
    if bad {
        return Err(ProtocolError::HandshakeError(format!(
            "{}: '{}'",
            constants::ERR_INVALID_IDENTITY,
            principal.escape_debug()
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, PublicKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, principal: &str, key: PublicKey) -> Result<()> {
        validate_principal(principal)?;
        let mut keys = self
            .keys
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?;
        keys.insert(principal.to_string(), key);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.read().map(|k| k.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyStore for MemoryKeyStore {
    fn public_key(&self, principal: &str) -> Result<PublicKey> {
        let keys = self
            .keys
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?;
        keys.get(principal).copied().ok_or_else(|| {
            ProtocolError::HandshakeError(format!(
                "{} '{principal}'",
                constants::ERR_CLIENT_PUBLIC_NOT_FOUND
            ))
        })
    }
}

/// Key store backed by a directory of `<principal>.pub` files.
///
/// The directory is scanned on [`open`](Self::open) and on [`reload`](Self::reload);
/// lookups never touch the filesystem.
#[derive(Debug)]
pub struct DirectoryKeyStore {
    dir: PathBuf,
    keys: RwLock<MemoryKeyStore>,
}

impl DirectoryKeyStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let keys = Self::scan(&dir)?;
        Ok(Self {
            dir,
            keys: RwLock::new(keys),
        })
    }

    pub fn reload(&self) -> Result<usize> {
        let fresh = Self::scan(&self.dir)?;
        let count = fresh.len();
        let mut keys = self
            .keys
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?;
        *keys = fresh;
        Ok(count)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn scan(dir: &Path) -> Result<MemoryKeyStore> {
        let entries = fs::read_dir(dir).map_err(|e| {
            ProtocolError::ConfigError(format!(
                "Failed to read key directory '{}': {e}",
                dir.display()
            ))
        })?;

        let store = MemoryKeyStore::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PUBLIC_KEY_EXTENSION) {
                continue;
            }
            let Some(principal) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Err(e) = PublicKey::load(&path).and_then(|key| store.insert(principal, key)) {
                warn!(path = %path.display(), error = %e, "Skipping unusable public key");
            }
        }

        debug!(dir = %dir.display(), keys = store.len(), "Loaded public keys");
        Ok(store)
    }
}

impl KeyStore for DirectoryKeyStore {
    fn public_key(&self, principal: &str) -> Result<PublicKey> {
        validate_principal(principal)?;
        let keys = self
            .keys
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?;
        keys.public_key(principal)
    }
}
