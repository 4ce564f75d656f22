//! Session-key stage installed once the handshake succeeds.
//!
//! Payload length is unbounded. Messages must be opened in the order they were
//! sealed; a dropped, replayed or reordered ciphertext is a decoding error.

use async_trait::async_trait;

use crate::channel::Channel;
use crate::crypto::{Role, SessionCipher, SessionSecrets};
use crate::error::Result;

pub struct SymmetricChannel<C> {
    inner: C,
    cipher: SessionCipher,
    closed: bool,
}

impl<C: Channel> SymmetricChannel<C> {
    pub fn new(inner: C, secrets: &SessionSecrets, role: Role) -> Self {
        Self {
            inner,
            cipher: SessionCipher::new(secrets, role),
            closed: false,
        }
    }

    pub fn role(&self) -> Role {
        self.cipher.role()
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

#[async_trait]
impl<C: Channel> Channel for SymmetricChannel<C> {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let ciphertext = self.cipher.seal(payload)?;
        self.inner.send(&ciphertext).await
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        let ciphertext = self.inner.receive().await?;
        self.cipher.open(&ciphertext)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close().await
    }
}
