//! # Channel Stack
//!
//! Composable duplex message endpoints. Every wrapper owns exactly one inner
//! channel and adds one transform; the chain is rooted at a single
//! [`LineChannel`].
//!
//! ## Variants
//! - **Raw** ([`LineChannel`]): newline-delimited frames over a byte stream
//! - **Base64** ([`Base64Channel`]): binary payloads as line-safe text
//! - **Asymmetric** ([`AsymmetricChannel`]): sealed to the remote public key
//! - **Symmetric** ([`SymmetricChannel`]): session key/IV encryption
//! - **IntegrityOnly** ([`IntegrityChannel`]): cleartext with an HMAC tag
//!
//! ## Contract
//! - `send`/`receive` apply their transform to the whole payload or fail
//! - decoding failures are `ProtocolError::DecodingError`, disconnects are
//!   `ConnectionClosed`/`Shutdown`/`Io`
//! - `close()` tears down the wrapper and then closes the inner channel; calling it
//!   again is a no-op

pub mod asymmetric;
pub mod base64;
pub mod integrity;
pub mod raw;
pub mod symmetric;

pub use self::asymmetric::AsymmetricChannel;
pub use self::base64::Base64Channel;
pub use self::integrity::{IntegrityChannel, Verified};
pub use self::raw::LineChannel;
pub use self::symmetric::SymmetricChannel;

use async_trait::async_trait;

use crate::crypto::{PrivateKey, PublicKey};
use crate::error::{constants, ProtocolError, Result};

/// A duplex message endpoint.
#[async_trait]
pub trait Channel: Send {
    async fn send(&mut self, payload: &[u8]) -> Result<()>;

    /// Blocks until a full message arrives or the transport goes away.
    async fn receive(&mut self) -> Result<Vec<u8>>;

    async fn close(&mut self) -> Result<()>;
}

/// Key slots of the asymmetric stage. Other variants do not carry keys.
pub trait KeyedChannel {
    fn set_own_key(&mut self, key: PrivateKey);

    fn set_opposite_key(&mut self, key: PublicKey);

    fn opposite_key(&self) -> Option<&PublicKey>;
}

/// UTF-8 text helpers for any channel.
#[async_trait]
pub trait ChannelExt: Channel {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.send(text.as_bytes()).await
    }

    async fn receive_text(&mut self) -> Result<String> {
        let bytes = self.receive().await?;
        String::from_utf8(bytes)
            .map_err(|_| ProtocolError::DecodingError(constants::ERR_INVALID_UTF8.into()))
    }
}

impl<C: Channel + ?Sized> ChannelExt for C {}

#[async_trait]
impl<C: Channel + ?Sized> Channel for Box<C> {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        (**self).send(payload).await
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        (**self).receive().await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}
