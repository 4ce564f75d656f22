//! HMAC-SHA256 over the pre-shared integrity key.

use std::fmt;
use std::fs;
use std::path::Path;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::channel::base64::{decode, encode};
use crate::crypto::{CryptoContext, HMAC_TAG_LEN};
use crate::error::{ProtocolError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted length of a shared integrity key
pub const MIN_INTEGRITY_KEY_LEN: usize = 16;

/// Key shared out-of-band by all participants of a private-messaging channel.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct IntegrityKey(Vec<u8>);

impl IntegrityKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_INTEGRITY_KEY_LEN {
            return Err(ProtocolError::ConfigError(format!(
                "Integrity key too short: {} bytes (minimum: {MIN_INTEGRITY_KEY_LEN})",
                bytes.len()
            )));
        }
        Ok(Self(bytes.to_vec()))
    }

    pub fn generate(ctx: &CryptoContext) -> Result<Self> {
        let bytes: [u8; 32] = ctx.random_array()?;
        Self::from_bytes(&bytes)
    }

    pub fn from_base64(text: &str) -> Result<Self> {
        let bytes = decode(text.trim().as_bytes())?;
        Self::from_bytes(&bytes)
    }

    pub fn to_base64(&self) -> String {
        encode(&self.0)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!(
                "Failed to read integrity key '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_base64(&text)
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.0)
            .map_err(|e| ProtocolError::ConfigError(format!("Invalid integrity key: {e}")))
    }

    pub fn tag(&self, message: &[u8]) -> Result<[u8; HMAC_TAG_LEN]> {
        let mut mac = self.mac()?;
        mac.update(message);
        Ok(mac.finalize().into_bytes().into())
    }

    /// Constant-time check of `tag` against the tag of `message`.
    pub fn verify(&self, message: &[u8], tag: &[u8]) -> bool {
        match self.mac() {
            Ok(mut mac) => {
                mac.update(message);
                mac.verify_slice(tag).is_ok()
            }
            Err(_) => false,
        }
    }
}

impl fmt::Debug for IntegrityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IntegrityKey(<redacted>)")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn key() -> IntegrityKey {
        IntegrityKey::from_bytes(b"0123456789abcdef0123456789abcdef").unwrap()
    }

    #[test]
    fn test_verify_own_tag() {
        let key = key();
        let tag = key.tag(b"!msg bob: hello").unwrap();
        assert!(key.verify(b"!msg bob: hello", &tag));
    }

    #[test]
    fn test_any_flipped_bit_fails() {
        let key = key();
        let message = b"!msg bob: hello".to_vec();
        let tag = key.tag(&message).unwrap();

        for i in 0..message.len() * 8 {
            let mut altered = message.clone();
            altered[i / 8] ^= 1 << (i % 8);
            assert!(!key.verify(&altered, &tag));
        }
        for i in 0..HMAC_TAG_LEN * 8 {
            let mut altered = tag;
            altered[i / 8] ^= 1 << (i % 8);
            assert!(!key.verify(&message, &altered));
        }
    }

    #[test]
    fn test_short_key_rejected() {
        assert!(IntegrityKey::from_bytes(b"short").is_err());
    }

    #[test]
    fn test_truncated_tag_fails() {
        let key = key();
        let tag = key.tag(b"hello").unwrap();
        assert!(!key.verify(b"hello", &tag[..16]));
    }
}
