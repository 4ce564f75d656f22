//! Public-key stage used for the handshake.
//!
//! Outgoing payloads are sealed to the remote party's public key and incoming
//! payloads are opened with the local private key. Plaintext is bounded by
//! [`MAX_SEALED_PLAINTEXT`](crate::crypto::sealed::MAX_SEALED_PLAINTEXT), so the
//! stage only carries short control messages.

use async_trait::async_trait;

use crate::channel::{Channel, KeyedChannel};
use crate::crypto::{sealed, CryptoContext, PrivateKey, PublicKey};
use crate::error::{constants, ProtocolError, Result};

pub struct AsymmetricChannel<C> {
    inner: C,
    ctx: CryptoContext,
    own_key: PrivateKey,
    opposite_key: Option<PublicKey>,
    closed: bool,
}

impl<C: Channel> AsymmetricChannel<C> {
    pub fn new(inner: C, ctx: CryptoContext, own_key: PrivateKey) -> Self {
        Self {
            inner,
            ctx,
            own_key,
            opposite_key: None,
            closed: false,
        }
    }

    pub fn with_opposite_key(mut self, key: PublicKey) -> Self {
        self.opposite_key = Some(key);
        self
    }

    pub fn own_public_key(&self) -> PublicKey {
        self.own_key.public_key()
    }

    pub fn context(&self) -> &CryptoContext {
        &self.ctx
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C> KeyedChannel for AsymmetricChannel<C> {
    fn set_own_key(&mut self, key: PrivateKey) {
        self.own_key = key;
    }

    fn set_opposite_key(&mut self, key: PublicKey) {
        self.opposite_key = Some(key);
    }

    fn opposite_key(&self) -> Option<&PublicKey> {
        self.opposite_key.as_ref()
    }
}

#[async_trait]
impl<C: Channel> Channel for AsymmetricChannel<C> {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let recipient = self
            .opposite_key
            .as_ref()
            .ok_or_else(|| ProtocolError::ConfigError(constants::ERR_NO_OPPOSITE_KEY.into()))?;
        let sealed = sealed::seal(&self.ctx, recipient, payload)?;
        self.inner.send(&sealed).await
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        let sealed = self.inner.receive().await?;
        sealed::open(&self.own_key, &sealed)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close().await
    }
}
