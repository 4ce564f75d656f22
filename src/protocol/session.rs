//! Connection-scoped session lifecycle.
//!
//! A [`Session`] owns one connection's channel chain and moves through
//! `Unauthenticated -> Authenticated -> Closed`. Logging out releases the
//! identity and puts a fresh asymmetric stage back on the same transport so the
//! peer can authenticate again.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::channel::{AsymmetricChannel, Channel, SymmetricChannel};
use crate::crypto::{CryptoContext, KeyStore, PrivateKey, PublicKey};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Closed,
}

enum Stage<C> {
    Unauthenticated(AsymmetricChannel<C>),
    Authenticated {
        channel: SymmetricChannel<C>,
        identity: String,
    },
    Closed,
}

pub struct Session<C> {
    stage: Stage<C>,
    ctx: CryptoContext,
    own_key: PrivateKey,
    pinned_peer: Option<PublicKey>,
}

impl<C: Channel> Session<C> {
    /// Wrap `inner` (normally Raw -> Base64) in a fresh asymmetric stage.
    pub fn new(inner: C, ctx: CryptoContext, own_key: PrivateKey) -> Self {
        let stage = Stage::Unauthenticated(AsymmetricChannel::new(
            inner,
            ctx.clone(),
            own_key.clone(),
        ));
        Self {
            stage,
            ctx,
            own_key,
            pinned_peer: None,
        }
    }

    /// Pin the remote public key (the server's, on a client). It survives logout.
    pub fn with_pinned_peer(mut self, key: PublicKey) -> Self {
        self.pinned_peer = Some(key);
        self.stage = match std::mem::replace(&mut self.stage, Stage::Closed) {
            Stage::Unauthenticated(chain) => Stage::Unauthenticated(chain.with_opposite_key(key)),
            other => other,
        };
        self
    }

    pub fn state(&self) -> SessionState {
        match self.stage {
            Stage::Unauthenticated(_) => SessionState::Unauthenticated,
            Stage::Authenticated { .. } => SessionState::Authenticated,
            Stage::Closed => SessionState::Closed,
        }
    }

    pub fn identity(&self) -> Option<&str> {
        match &self.stage {
            Stage::Authenticated { identity, .. } => Some(identity),
            _ => None,
        }
    }

    fn take_unauthenticated(&mut self) -> Result<AsymmetricChannel<C>> {
        match std::mem::replace(&mut self.stage, Stage::Closed) {
            Stage::Unauthenticated(chain) => Ok(chain),
            other => {
                self.stage = other;
                Err(ProtocolError::SessionError(
                    constants::ERR_INVALID_STATE.into(),
                ))
            }
        }
    }

    /// Run the responder handshake. On failure the session is closed.
    pub async fn respond(&mut self, keys: &dyn KeyStore, timeout: Duration) -> Result<&str> {
        let chain = self.take_unauthenticated()?;
        let (channel, identity) = handshake::respond(chain, keys, timeout).await?.into_parts();
        self.stage = Stage::Authenticated { channel, identity };
        Ok(self.identity().unwrap_or_default())
    }

    /// Responder handshake for a connection that logged out: wait as long as it
    /// takes for the next `!authenticate`, then apply `timeout` to the rest.
    pub async fn respond_idle(&mut self, keys: &dyn KeyStore, timeout: Duration) -> Result<&str> {
        let chain = self.take_unauthenticated()?;
        let (channel, identity) = handshake::respond_idle(chain, keys, timeout)
            .await?
            .into_parts();
        self.stage = Stage::Authenticated { channel, identity };
        Ok(self.identity().unwrap_or_default())
    }

    /// Run the initiator handshake as `identity`. On failure the session is closed.
    pub async fn initiate(&mut self, identity: &str, timeout: Duration) -> Result<()> {
        let chain = self.take_unauthenticated()?;
        let (channel, identity) = handshake::initiate(chain, identity, timeout)
            .await?
            .into_parts();
        self.stage = Stage::Authenticated { channel, identity };
        Ok(())
    }

    /// Release the bound identity and revert to a fresh unauthenticated stage
    /// on the same transport. Returns the identity that was released.
    pub fn logout(&mut self) -> Result<String> {
        match std::mem::replace(&mut self.stage, Stage::Closed) {
            Stage::Authenticated { channel, identity } => {
                let mut chain = AsymmetricChannel::new(
                    channel.into_inner(),
                    self.ctx.clone(),
                    self.own_key.clone(),
                );
                if let Some(key) = self.pinned_peer {
                    chain = chain.with_opposite_key(key);
                }
                self.stage = Stage::Unauthenticated(chain);
                debug!(identity = %identity, "Session logged out");
                Ok(identity)
            }
            other => {
                self.stage = other;
                Err(ProtocolError::SessionError(constants::ERR_NOT_LOGGED_IN.into()))
            }
        }
    }
}

#[async_trait]
impl<C: Channel> Channel for Session<C> {
    /// Application traffic; only valid once authenticated.
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        match &mut self.stage {
            Stage::Authenticated { channel, .. } => channel.send(payload).await,
            Stage::Unauthenticated(_) => Err(ProtocolError::SessionError(
                constants::ERR_NOT_LOGGED_IN.into(),
            )),
            Stage::Closed => Err(ProtocolError::ConnectionClosed),
        }
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        match &mut self.stage {
            Stage::Authenticated { channel, .. } => channel.receive().await,
            Stage::Unauthenticated(_) => Err(ProtocolError::SessionError(
                constants::ERR_NOT_LOGGED_IN.into(),
            )),
            Stage::Closed => Err(ProtocolError::ConnectionClosed),
        }
    }

    async fn close(&mut self) -> Result<()> {
        let result = match &mut self.stage {
            Stage::Authenticated { channel, .. } => channel.close().await,
            Stage::Unauthenticated(chain) => chain.close().await,
            Stage::Closed => Ok(()),
        };
        self.stage = Stage::Closed;
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::channel::{Base64Channel, ChannelExt, LineChannel};
    use crate::crypto::MemoryKeyStore;
    use tokio::io::DuplexStream;

    type Inner = Base64Channel<LineChannel<DuplexStream>>;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn sessions() -> (Session<Inner>, Session<Inner>, MemoryKeyStore) {
        let ctx = CryptoContext::new().unwrap();
        let client_key = PrivateKey::generate(&ctx).unwrap();
        let server_key = PrivateKey::generate(&ctx).unwrap();
        let keys = MemoryKeyStore::new();
        keys.insert("alice", client_key.public_key()).unwrap();
        keys.insert("bob", client_key.public_key()).unwrap();

        let (a, b) = tokio::io::duplex(16 * 1024);
        let server_pub = server_key.public_key();
        let client = Session::new(
            Base64Channel::new(LineChannel::new(a, 8192)),
            ctx.clone(),
            client_key,
        )
        .with_pinned_peer(server_pub);
        let server = Session::new(
            Base64Channel::new(LineChannel::new(b, 8192)),
            ctx,
            server_key,
        );
        (client, server, keys)
    }

    #[tokio::test]
    async fn test_lifecycle_with_reauthentication() {
        let (mut client, mut server, keys) = sessions();
        assert_eq!(client.state(), SessionState::Unauthenticated);
        assert!(client.send(b"too early").await.is_err());

        let server_task = tokio::spawn(async move {
            let identity = server.respond(&keys, TIMEOUT).await.unwrap().to_string();
            assert_eq!(identity, "alice");
            assert_eq!(server.receive_text().await.unwrap(), "!logout");
            assert_eq!(server.logout().unwrap(), "alice");
            server.respond(&keys, TIMEOUT).await.unwrap();
            server
        });

        client.initiate("alice", TIMEOUT).await.unwrap();
        assert_eq!(client.identity(), Some("alice"));
        client.send_text("!logout").await.unwrap();
        assert_eq!(client.logout().unwrap(), "alice");
        assert_eq!(client.state(), SessionState::Unauthenticated);

        // same transport, new handshake and fresh session key
        client.initiate("bob", TIMEOUT).await.unwrap();
        let mut server = server_task.await.unwrap();
        assert_eq!(server.identity(), Some("bob"));

        client.send_text("hello again").await.unwrap();
        assert_eq!(server.receive_text().await.unwrap(), "hello again");

        client.close().await.unwrap();
        assert_eq!(client.state(), SessionState::Closed);
        assert!(server.receive().await.unwrap_err().is_disconnect());
    }

    #[tokio::test]
    async fn test_logout_requires_login() {
        let (mut client, _server, _keys) = sessions();
        let err = client.logout().unwrap_err();
        assert!(matches!(err, ProtocolError::SessionError(_)));
        assert_eq!(client.state(), SessionState::Unauthenticated);
    }
}
