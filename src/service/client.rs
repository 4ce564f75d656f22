use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, info, instrument};

use crate::channel::{Base64Channel, Channel, ChannelExt, LineChannel};
use crate::config::{ChatConfig, ClientConfig};
use crate::crypto::{CryptoContext, PrivateKey, PublicKey};
use crate::error::Result;
use crate::protocol::{Session, SessionState};
use crate::service::server::LOGOUT;
use crate::utils::timeout::with_timeout_error;

type ClientSession = Session<Base64Channel<LineChannel<TcpStream>>>;

/// Authenticated connection to a chat server.
///
/// The server's public key is pinned at connect time and kept across logout, so
/// [`login`](SecureClient::login) can re-authenticate on the same transport.
pub struct SecureClient {
    session: ClientSession,
    handshake_timeout: Duration,
    response_timeout: Duration,
}

impl SecureClient {
    /// Connect to `config.server_address` and authenticate as `config.identity`.
    #[instrument(skip_all, fields(server = %config.server_address, identity = %config.identity))]
    pub async fn connect(
        config: &ClientConfig,
        ctx: CryptoContext,
        own_key: PrivateKey,
        server_key: PublicKey,
    ) -> Result<Self> {
        let raw = with_timeout_error(
            LineChannel::connect(config.server_address.as_str(), config.max_line_length),
            config.connection_timeout,
        )
        .await?;

        let session =
            Session::new(Base64Channel::new(raw), ctx, own_key).with_pinned_peer(server_key);
        let mut client = Self {
            session,
            handshake_timeout: config.handshake_timeout,
            response_timeout: config.response_timeout,
        };
        client.login(&config.identity).await?;
        Ok(client)
    }

    /// Connect using the key files named in `config.keys`.
    pub async fn from_config(config: &ChatConfig, ctx: CryptoContext) -> Result<Self> {
        let own_key = config.keys.load_private_key()?;
        let server_key = config.keys.load_server_public_key()?;
        Self::connect(&config.client, ctx, own_key, server_key).await
    }

    /// Run the handshake as `identity`. Only valid while logged out.
    pub async fn login(&mut self, identity: &str) -> Result<()> {
        self.session.initiate(identity, self.handshake_timeout).await?;
        info!(identity = %identity, "Logged in");
        Ok(())
    }

    pub fn identity(&self) -> Option<&str> {
        self.session.identity()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Send one line and wait for the server's reply.
    pub async fn request(&mut self, line: &str) -> Result<String> {
        self.session.send_text(line).await?;
        with_timeout_error(self.session.receive_text(), self.response_timeout).await
    }

    /// Release the identity on the server; the connection stays open.
    pub async fn logout(&mut self) -> Result<String> {
        let reply = self.request(LOGOUT).await?;
        let identity = self.session.logout()?;
        debug!(identity = %identity, reply = %reply, "Logged out");
        Ok(reply)
    }

    pub async fn close(&mut self) -> Result<()> {
        self.session.close().await
    }
}
