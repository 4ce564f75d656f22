//! Session cipher used after the handshake.
//!
//! XChaCha20-Poly1305 keyed by the 256-bit session key. The IV agreed in the
//! handshake never changes during a session; each message's 192-bit nonce is the
//! IV followed by a direction bit and a 63-bit sequence number, so the two
//! directions never share a keystream and a replayed, dropped or reordered
//! message fails to open.
//!
//! ```text
//! nonce = [IV (16)] [direction bit | sequence (8, big-endian)]
//! ```

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};

use crate::crypto::material::{Iv, SessionKey, SessionSecrets};
use crate::crypto::IV_LEN;
use crate::error::{constants, ProtocolError, Result};

const DIRECTION_BIT: u64 = 1 << 63;

/// Which end of the handshake a party played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    fn outbound_bit(self) -> u64 {
        match self {
            Role::Initiator => 0,
            Role::Responder => DIRECTION_BIT,
        }
    }

    fn inbound_bit(self) -> u64 {
        DIRECTION_BIT ^ self.outbound_bit()
    }
}

fn nonce_for(iv: &Iv, direction: u64, sequence: u64) -> Result<XNonce> {
    if sequence >= DIRECTION_BIT {
        return Err(ProtocolError::DecodingError(
            constants::ERR_SEQUENCE_EXHAUSTED.into(),
        ));
    }
    let mut nonce = [0u8; 24];
    nonce[..IV_LEN].copy_from_slice(iv.as_bytes());
    nonce[IV_LEN..].copy_from_slice(&(direction | sequence).to_be_bytes());
    Ok(XNonce::from(nonce))
}

fn cipher_for(key: &SessionKey) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
}

/// Encrypt one message for `sender`'s direction at position `sequence`.
pub fn encrypt(
    key: &SessionKey,
    iv: &Iv,
    sender: Role,
    sequence: u64,
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let nonce = nonce_for(iv, sender.outbound_bit(), sequence)?;
    cipher_for(key)
        .encrypt(&nonce, plaintext)
        .map_err(|_| ProtocolError::DecodingError(constants::ERR_SESSION_ENCRYPT.into()))
}

/// Inverse of [`encrypt`]; `sender` is the role of the party that encrypted.
pub fn decrypt(
    key: &SessionKey,
    iv: &Iv,
    sender: Role,
    sequence: u64,
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let nonce = nonce_for(iv, sender.outbound_bit(), sequence)?;
    cipher_for(key)
        .decrypt(&nonce, ciphertext)
        .map_err(|_| ProtocolError::DecodingError(constants::ERR_SESSION_DECRYPT.into()))
}

/// Stateful cipher for one end of a session.
pub struct SessionCipher {
    cipher: XChaCha20Poly1305,
    iv: Iv,
    role: Role,
    send_sequence: u64,
    recv_sequence: u64,
}

impl SessionCipher {
    pub fn new(secrets: &SessionSecrets, role: Role) -> Self {
        Self {
            cipher: cipher_for(secrets.key()),
            iv: *secrets.iv(),
            role,
            send_sequence: 0,
            recv_sequence: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = nonce_for(&self.iv, self.role.outbound_bit(), self.send_sequence)?;
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| ProtocolError::DecodingError(constants::ERR_SESSION_ENCRYPT.into()))?;
        self.send_sequence += 1;
        Ok(ciphertext)
    }

    /// The receive sequence only advances on success.
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce = nonce_for(&self.iv, self.role.inbound_bit(), self.recv_sequence)?;
        let plaintext = self
            .cipher
            .decrypt(&nonce, ciphertext)
            .map_err(|_| ProtocolError::DecodingError(constants::ERR_SESSION_DECRYPT.into()))?;
        self.recv_sequence += 1;
        Ok(plaintext)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crypto::CryptoContext;

    fn pair() -> (SessionCipher, SessionCipher) {
        let ctx = CryptoContext::new().unwrap();
        let secrets = ctx.session_secrets().unwrap();
        (
            SessionCipher::new(&secrets, Role::Initiator),
            SessionCipher::new(&secrets, Role::Responder),
        )
    }

    #[test]
    fn test_both_directions() {
        let (mut client, mut server) = pair();
        let up = client.seal(b"!list").unwrap();
        assert_eq!(server.open(&up).unwrap(), b"!list");
        let down = server.seal(b"alice online").unwrap();
        assert_eq!(client.open(&down).unwrap(), b"alice online");
    }

    #[test]
    fn test_directions_use_distinct_keystreams() {
        let (mut client, mut server) = pair();
        let up = client.seal(b"same text").unwrap();
        let down = server.seal(b"same text").unwrap();
        assert_ne!(up, down);
    }

    #[test]
    fn test_replayed_message_rejected() {
        let (mut client, mut server) = pair();
        let first = client.seal(b"one").unwrap();
        assert!(server.open(&first).is_ok());
        assert!(server.open(&first).is_err());

        // a failed open does not advance the receive position
        let second = client.seal(b"two").unwrap();
        assert_eq!(server.open(&second).unwrap(), b"two");
    }

    #[test]
    fn test_stateless_functions_agree_with_cipher() {
        let ctx = CryptoContext::new().unwrap();
        let secrets = ctx.session_secrets().unwrap();
        let mut client = SessionCipher::new(&secrets, Role::Initiator);
        let sealed = client.seal(b"hello").unwrap();
        let opened = decrypt(secrets.key(), secrets.iv(), Role::Initiator, 0, &sealed).unwrap();
        assert_eq!(opened, b"hello");
    }

    #[test]
    fn test_wrong_iv_fails() {
        let ctx = CryptoContext::new().unwrap();
        let secrets = ctx.session_secrets().unwrap();
        let other_iv = Iv::from_bytes([9u8; IV_LEN]);
        let sealed = encrypt(secrets.key(), secrets.iv(), Role::Responder, 3, b"x").unwrap();
        assert!(decrypt(secrets.key(), &other_iv, Role::Responder, 3, &sealed).is_err());
    }
}
