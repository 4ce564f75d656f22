//! Randomized public-key encryption for short control messages.
//!
//! Every call draws a fresh ephemeral X25519 key, agrees a shared secret with the
//! recipient's public key, derives a ChaCha20-Poly1305 key with HKDF-SHA256 and
//! encrypts under a random nonce. Encrypting the same plaintext twice therefore
//! yields different ciphertexts, and only the holder of the recipient's private
//! key can open them.
//!
//! ```text
//! [ephemeral public key (32)] [nonce (12)] [ciphertext + tag (N + 16)]
//! ```

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::crypto::{CryptoContext, KEY_LEN};
use crate::error::{constants, ProtocolError, Result};

const HKDF_INFO: &[u8] = b"secure-chat sealed v1";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Largest plaintext the asymmetric stage accepts.
pub const MAX_SEALED_PLAINTEXT: usize = 512;

/// Fixed overhead added by [`seal`].
pub const SEALED_OVERHEAD: usize = KEY_LEN + NONCE_LEN + TAG_LEN;

fn derive_cipher(
    shared: &[u8],
    ephemeral: &PublicKey,
    recipient: &PublicKey,
) -> Result<ChaCha20Poly1305> {
    let mut salt = [0u8; 2 * KEY_LEN];
    salt[..KEY_LEN].copy_from_slice(ephemeral.as_bytes());
    salt[KEY_LEN..].copy_from_slice(recipient.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(HKDF_INFO, &mut okm[..])
        .map_err(|_| ProtocolError::Custom("HKDF expansion failed".into()))?;

    Ok(ChaCha20Poly1305::new(Key::from_slice(&okm[..])))
}

/// Encrypt `plaintext` so that only the owner of `recipient` can read it.
pub fn seal(ctx: &CryptoContext, recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    if plaintext.len() > MAX_SEALED_PLAINTEXT {
        return Err(ProtocolError::OversizedPayload(plaintext.len()));
    }

    let ephemeral = PrivateKey::generate(ctx)?;
    let ephemeral_public = ephemeral.public_key();
    let shared = ephemeral.diffie_hellman(recipient);
    let cipher = derive_cipher(shared.as_bytes(), &ephemeral_public, recipient)?;

    let nonce: [u8; NONCE_LEN] = ctx.random_array()?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| ProtocolError::DecodingError(constants::ERR_SEAL_FAILED.into()))?;

    let mut out = Vec::with_capacity(SEALED_OVERHEAD + plaintext.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a payload produced by [`seal`] for `own_key`'s public half.
pub fn open(own_key: &PrivateKey, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < SEALED_OVERHEAD {
        return Err(ProtocolError::DecodingError(
            constants::ERR_SEALED_TOO_SHORT.into(),
        ));
    }

    let (ephemeral_bytes, rest) = sealed.split_at(KEY_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let mut ephemeral = [0u8; KEY_LEN];
    ephemeral.copy_from_slice(ephemeral_bytes);
    let ephemeral_public = PublicKey::from_bytes(ephemeral);

    let shared = own_key.diffie_hellman(&ephemeral_public);
    let cipher = derive_cipher(shared.as_bytes(), &ephemeral_public, &own_key.public_key())?;

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| ProtocolError::DecodingError(constants::ERR_OPEN_FAILED.into()))
}
