//! # Chat Server
//!
//! Accepts TCP connections and runs one task per connection. Each task:
//!
//! 1. wraps the socket as `LineChannel -> Base64Channel -> AsymmetricChannel`
//! 2. runs the responder handshake and binds the declared identity
//! 3. serves application lines over the symmetric session until the peer
//!    disconnects, logs out, or the server shuts down
//!
//! `!logout` releases the identity and puts the connection back into the
//! unauthenticated stage so the same transport can authenticate again. Every
//! other line goes to the [`Dispatcher`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::channel::{Base64Channel, Channel, ChannelExt, LineChannel};
use crate::config::{ChatConfig, ServerConfig};
use crate::crypto::{CryptoContext, KeyStore, PrivateKey};
use crate::error::{constants, ErrorKind, ProtocolError, Result};
use crate::protocol::{Dispatcher, Session};
use crate::service::sessions::{ConnectionId, SessionTable};
use crate::utils::metrics::Metrics;

/// Releases the caller's identity and reverts the connection.
pub const LOGOUT: &str = "!logout";

/// Reply to a successful [`LOGOUT`].
pub const LOGGED_OUT: &str = "Successfully logged out.";

type ServerSession = Session<Base64Channel<LineChannel<TcpStream>>>;

pub struct ChatServer {
    config: ServerConfig,
    ctx: CryptoContext,
    private_key: PrivateKey,
    keys: Arc<dyn KeyStore>,
    sessions: SessionTable,
    dispatcher: Dispatcher,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
    active_connections: AtomicUsize,
    next_connection: AtomicU64,
}

impl ChatServer {
    pub fn new(
        config: ServerConfig,
        ctx: CryptoContext,
        private_key: PrivateKey,
        keys: Arc<dyn KeyStore>,
    ) -> Self {
        Self {
            config,
            ctx,
            private_key,
            keys,
            sessions: SessionTable::new(),
            dispatcher: Dispatcher::new(),
            metrics: Arc::new(Metrics::new()),
            shutdown: CancellationToken::new(),
            active_connections: AtomicUsize::new(0),
            next_connection: AtomicU64::new(1),
        }
    }

    /// Build a server from configuration, loading the private key and opening
    /// the public key directory.
    pub fn from_config(config: &ChatConfig, ctx: CryptoContext) -> Result<Self> {
        let private_key = config.keys.load_private_key()?;
        let keys = Arc::new(config.keys.open_key_store()?);
        Ok(Self::new(config.server.clone(), ctx, private_key, keys))
    }

    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting, cancel every connection, and let `serve` drain.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.address)
            .await
            .map_err(|e| {
                ProtocolError::TransportError(format!(
                    "Failed to bind {}: {e}",
                    self.config.address
                ))
            })?;
        self.serve(listener).await
    }

    /// Accept loop over an already bound listener.
    #[instrument(skip_all, fields(address = ?listener.local_addr().ok()))]
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("Chat server listening");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutting down server. Waiting for connections to close...");
                    self.drain().await;
                    self.metrics.log_metrics();
                    return Ok(());
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => self.admit(stream, peer),
                        Err(e) => {
                            self.metrics.connection_error();
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
            }
        }
    }

    fn admit(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        if self.active_connections() >= self.config.max_connections {
            warn!(peer = %peer, limit = self.config.max_connections, "Connection limit reached");
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.metrics.connection_established();
        info!(peer = %peer, connection = id, "New connection established");

        let server = Arc::clone(self);
        tokio::spawn(async move {
            server.handle_connection(stream, id).await;
            server.active_connections.fetch_sub(1, Ordering::Relaxed);
            server.metrics.connection_closed();
            info!(peer = %peer, connection = id, "Connection closed");
        });
    }

    async fn drain(&self) {
        let timeout = tokio::time::sleep(self.config.shutdown_timeout);
        tokio::pin!(timeout);

        loop {
            let connections = self.active_connections();
            if connections == 0 {
                info!("All connections closed, shutting down");
                return;
            }
            tokio::select! {
                _ = &mut timeout => {
                    warn!(connections, "Shutdown timeout reached, forcing exit");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(50)) => {
                    debug!(connections, "Waiting for connections to close");
                }
            }
        }
    }

    #[instrument(skip(self, stream))]
    async fn handle_connection(&self, stream: TcpStream, connection: ConnectionId) {
        let raw = LineChannel::new(stream, self.config.max_line_length)
            .with_shutdown(self.shutdown.child_token());
        let mut session: ServerSession = Session::new(
            Base64Channel::new(raw),
            self.ctx.clone(),
            self.private_key.clone(),
        );

        let result = self.drive(&mut session, connection).await;

        // best-effort cleanup whichever way the connection ended
        if let Some(identity) = session.identity() {
            if self.sessions.unbind(identity, connection) {
                self.metrics.session_unbound();
            }
        }
        if let Err(e) = session.close().await {
            debug!(error = %e, "Error closing connection");
        }

        match result {
            Ok(()) => {}
            Err(e) if e.is_disconnect() => debug!(error = %e, "Peer disconnected"),
            Err(e) => {
                if e.kind() == ErrorKind::Decoding {
                    self.metrics.decoding_error();
                }
                self.metrics.connection_error();
                warn!(error = %e, "Connection terminated");
            }
        }
    }

    /// Alternate between handshake and serving until the connection ends.
    async fn drive(&self, session: &mut ServerSession, connection: ConnectionId) -> Result<()> {
        let timeout = self.config.handshake_timeout;
        let mut logged_out = false;
        loop {
            self.metrics.handshake_attempt();
            let responded = if logged_out {
                session.respond_idle(self.keys.as_ref(), timeout).await
            } else {
                session.respond(self.keys.as_ref(), timeout).await
            };
            let identity = match responded {
                Ok(identity) => identity.to_string(),
                Err(e) => {
                    if !e.is_disconnect() {
                        self.metrics.handshake_failed();
                    }
                    return Err(e);
                }
            };
            self.metrics.handshake_success();

            if let Err(e) = self.sessions.bind(&identity, connection) {
                info!(identity = %identity, "Rejected duplicate login");
                session.send_text(constants::ERR_ALREADY_LOGGED_IN).await?;
                return Err(e);
            }
            self.metrics.session_bound();
            info!(identity = %identity, "Session established");

            self.serve_session(session, &identity).await?;

            if self.sessions.unbind(&identity, connection) {
                self.metrics.session_unbound();
            }
            session.logout()?;
            logged_out = true;
            debug!(identity = %identity, "Awaiting re-authentication");
        }
    }

    /// Serve application lines until `!logout`. Errors end the connection.
    async fn serve_session(&self, session: &mut ServerSession, identity: &str) -> Result<()> {
        loop {
            let line = session.receive_text().await?;
            self.metrics.message_received(line.len() as u64);

            let logout = line.trim() == LOGOUT;
            let reply = if logout {
                LOGGED_OUT.to_string()
            } else {
                self.dispatcher.dispatch(identity, &line).unwrap_or_else(|e| {
                    warn!(identity = %identity, error = %e, "Request handler failed");
                    format!("Error: {e}")
                })
            };

            session.send_text(&reply).await?;
            self.metrics.message_sent(reply.len() as u64);

            if logout {
                return Ok(());
            }
        }
    }
}
