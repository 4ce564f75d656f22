//! # Cryptographic Primitives
//!
//! Everything the channel stack needs from cryptography, reached through one
//! explicitly constructed [`CryptoContext`].
//!
//! ## Components
//! - **Material**: handshake challenges, session key and IV
//! - **Keys**: long-lived X25519 key pairs, key files, the [`KeyStore`] lookup seam
//! - **Sealed**: randomized public-key encryption for handshake messages
//! - **Session**: XChaCha20-Poly1305 keyed by the session key/IV pair
//! - **Mac**: HMAC-SHA256 tags for tamper-evident messaging
//!
//! ## Security
//! - All randomness comes from the operating system RNG (getrandom)
//! - Secret material is zeroized on drop
//! - Tags and challenges are compared in constant time

pub mod keys;
pub mod mac;
pub mod material;
pub mod sealed;
pub mod session;

pub use keys::{DirectoryKeyStore, KeyStore, MemoryKeyStore, PrivateKey, PublicKey};
pub use mac::IntegrityKey;
pub use material::{Challenge, Iv, SessionKey, SessionSecrets};
pub use session::{Role, SessionCipher};

use crate::error::{constants, ProtocolError, Result};
use tracing::debug;

/// Length of a handshake challenge in bytes
pub const CHALLENGE_LEN: usize = 32;

/// Length of the session key in bytes (256 bit)
pub const SESSION_KEY_LEN: usize = 32;

/// Length of the session IV in bytes (128 bit)
pub const IV_LEN: usize = 16;

/// Length of an HMAC-SHA256 tag in bytes
pub const HMAC_TAG_LEN: usize = 32;

/// Length of an X25519 key in bytes
pub const KEY_LEN: usize = 32;

/// Process-wide handle to the cryptographic primitives.
///
/// Constructed once at startup and passed to every component that needs random
/// material. Construction draws from the OS RNG so a broken entropy source surfaces as
/// a startup error instead of a failure in the middle of a handshake.
#[derive(Debug, Clone)]
pub struct CryptoContext {
    _private: (),
}

impl CryptoContext {
    pub fn new() -> Result<Self> {
        let mut seed_check = [0u8; 16];
        getrandom::fill(&mut seed_check).map_err(|e| {
            ProtocolError::CryptoUnavailable(format!("{}: {e}", constants::ERR_RNG_UNAVAILABLE))
        })?;
        debug!("Crypto context initialized");
        Ok(Self { _private: () })
    }

    /// Fill `buf` with cryptographically secure random bytes.
    pub fn fill_random(&self, buf: &mut [u8]) -> Result<()> {
        getrandom::fill(buf).map_err(|e| {
            ProtocolError::CryptoUnavailable(format!("{}: {e}", constants::ERR_RNG_UNAVAILABLE))
        })
    }

    pub fn random_array<const N: usize>(&self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        self.fill_random(&mut out)?;
        Ok(out)
    }

    /// Fresh handshake challenge.
    pub fn challenge(&self) -> Result<Challenge> {
        Ok(Challenge::from_bytes(self.random_array()?))
    }

    /// Fresh session key and IV; called exactly once per handshake.
    pub fn session_secrets(&self) -> Result<SessionSecrets> {
        let key = SessionKey::from_bytes(self.random_array()?);
        let iv = Iv::from_bytes(self.random_array()?);
        Ok(SessionSecrets::new(key, iv))
    }
}
