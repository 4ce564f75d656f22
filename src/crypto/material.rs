//! Handshake challenges and session key material.
//!
//! All three types travel base64-encoded inside handshake messages.

use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::channel::base64::{decode, encode};
use crate::crypto::{CHALLENGE_LEN, IV_LEN, SESSION_KEY_LEN};
use crate::error::{ProtocolError, Result};

fn decode_fixed<const N: usize>(text: &str, what: &str) -> Result<[u8; N]> {
    let bytes = decode(text.as_bytes())?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| {
        ProtocolError::DecodingError(format!(
            "{what} must be {N} bytes, got {}",
            bytes.len()
        ))
    })
}

/// Random nonce generated per handshake attempt and discarded after use.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Challenge([u8; CHALLENGE_LEN]);

impl Challenge {
    pub fn from_bytes(bytes: [u8; CHALLENGE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CHALLENGE_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        encode(&self.0)
    }

    pub fn from_base64(text: &str) -> Result<Self> {
        Ok(Self(decode_fixed(text, "challenge")?))
    }

    /// Constant-time equality.
    pub fn matches(&self, other: &Challenge) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Challenge({})", self.to_base64())
    }
}

/// 256-bit session key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        encode(&self.0)
    }

    pub fn from_base64(text: &str) -> Result<Self> {
        Ok(Self(decode_fixed(text, "session key")?))
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// 128-bit initialization vector, fixed for the lifetime of one session.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Iv([u8; IV_LEN]);

impl Iv {
    pub fn from_bytes(bytes: [u8; IV_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; IV_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        encode(&self.0)
    }

    pub fn from_base64(text: &str) -> Result<Self> {
        Ok(Self(decode_fixed(text, "IV")?))
    }
}

/// Key and IV agreed during one handshake.
#[derive(Clone, Debug)]
pub struct SessionSecrets {
    key: SessionKey,
    iv: Iv,
}

impl SessionSecrets {
    pub fn new(key: SessionKey, iv: Iv) -> Self {
        Self { key, iv }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn iv(&self) -> &Iv {
        &self.iv
    }
}
