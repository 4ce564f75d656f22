//! # Private Messaging
//!
//! Client-to-client delivery without the server. Each delivery is one TCP
//! connection carrying one tagged message and one tagged reply over an
//! [`IntegrityChannel`]. Nothing is encrypted; tampering is detected and
//! reported, not prevented.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::channel::{Channel, ChannelExt, IntegrityChannel, LineChannel};
use crate::config::{ChatConfig, MAX_LINE_LENGTH};
use crate::crypto::IntegrityKey;
use crate::error::{ProtocolError, Result};
use crate::protocol::private::{self, DeliveryReport, IncomingMessage};
use crate::utils::metrics::Metrics;
use crate::utils::timeout::{with_timeout_error, DEFAULT_TIMEOUT};

/// Send `text` from `sender` and read back the acknowledgment.
pub async fn deliver<C: Channel>(
    channel: &mut IntegrityChannel<C>,
    sender: &str,
    peer: &str,
    text: &str,
    timeout: Duration,
) -> Result<DeliveryReport> {
    channel.send_text(&private::compose(sender, text)).await?;
    let reply = with_timeout_error(channel.receive_verified(), timeout).await?;
    let report = DeliveryReport::from_reply(peer, reply);
    if !report.is_clean() {
        warn!(
            peer = %peer,
            forward_tampered = report.forward_tampered,
            reply_tampered = report.reply_tampered,
            "Private message exchange tampered"
        );
    }
    Ok(report)
}

/// Receive one message on behalf of `receiver` and answer it.
pub async fn answer<C: Channel>(
    channel: &mut IntegrityChannel<C>,
    receiver: &str,
) -> Result<IncomingMessage> {
    let verified = channel.receive_verified().await?;
    channel.send_text(&private::reply_for(receiver, &verified)).await?;
    Ok(IncomingMessage::from_verified(verified))
}

/// Connect to `addr`, deliver one message and close.
#[instrument(skip(addr, key, text))]
pub async fn send_private<A: ToSocketAddrs>(
    addr: A,
    key: &IntegrityKey,
    sender: &str,
    peer: &str,
    text: &str,
    timeout: Duration,
) -> Result<DeliveryReport> {
    let raw = with_timeout_error(LineChannel::connect(addr, MAX_LINE_LENGTH), timeout).await?;
    let mut channel = IntegrityChannel::new(raw, key.clone());

    let report = deliver(&mut channel, sender, peer, text, timeout).await;
    if let Err(e) = channel.close().await {
        debug!(error = %e, "Error closing private channel");
    }
    report
}

/// Accepts private messages for one user until cancelled.
pub struct PrivateListener {
    name: String,
    key: IntegrityKey,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
    timeout: Duration,
    address: Option<String>,
}

impl PrivateListener {
    pub fn new(name: impl Into<String>, key: IntegrityKey) -> Self {
        Self {
            name: name.into(),
            key,
            metrics: Arc::new(Metrics::new()),
            shutdown: CancellationToken::new(),
            timeout: DEFAULT_TIMEOUT,
            address: None,
        }
    }

    /// Listener for `client.identity` on `client.private_address`, keyed with
    /// the file at `keys.hmac_key`.
    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        let key = config.keys.load_integrity_key()?;
        let mut listener = Self::new(config.client.identity.clone(), key)
            .with_timeout(config.client.response_timeout);
        listener.address = config.client.private_address.clone();
        Ok(listener)
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Bound on waiting for a connected sender's message.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bind the configured private address and serve it.
    pub async fn listen(self, inbox: mpsc::Sender<IncomingMessage>) -> Result<()> {
        let address = self.address.clone().ok_or_else(|| {
            ProtocolError::ConfigError("client.private_address is not configured".into())
        })?;
        self.run(&address, inbox).await
    }

    /// Bind `address` and serve it.
    pub async fn run(self, address: &str, inbox: mpsc::Sender<IncomingMessage>) -> Result<()> {
        let listener = TcpListener::bind(address).await.map_err(|e| {
            ProtocolError::TransportError(format!("Failed to bind {address}: {e}"))
        })?;
        self.serve(listener, inbox).await
    }

    /// Serve `listener`, pushing every received message (authentic or not)
    /// into `inbox`. Returns when the shutdown token is cancelled.
    #[instrument(skip_all, fields(name = %self.name))]
    pub async fn serve(
        self,
        listener: TcpListener,
        inbox: mpsc::Sender<IncomingMessage>,
    ) -> Result<()> {
        let this = Arc::new(self);
        info!(address = ?listener.local_addr().ok(), "Private listener started");

        loop {
            tokio::select! {
                _ = this.shutdown.cancelled() => {
                    info!("Private listener stopped");
                    return Ok(());
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            debug!(peer = %peer, "Private connection");
                            let this = Arc::clone(&this);
                            let inbox = inbox.clone();
                            tokio::spawn(async move { this.handle(stream, inbox).await });
                        }
                        Err(e) => {
                            this.metrics.connection_error();
                            error!(error = %e, "Error accepting private connection");
                        }
                    }
                }
            }
        }
    }

    async fn handle(&self, stream: TcpStream, inbox: mpsc::Sender<IncomingMessage>) {
        self.metrics.connection_established();
        let raw =
            LineChannel::new(stream, MAX_LINE_LENGTH).with_shutdown(self.shutdown.child_token());
        let mut channel = IntegrityChannel::new(raw, self.key.clone());

        match with_timeout_error(answer(&mut channel, &self.name), self.timeout).await {
            Ok(message) => {
                self.metrics.message_received(message.text.len() as u64);
                if !message.authentic {
                    self.metrics.integrity_mismatch();
                }
                if inbox.send(message).await.is_err() {
                    debug!("Inbox closed, message dropped");
                }
            }
            Err(e) if e.is_disconnect() => debug!(error = %e, "Sender disconnected"),
            Err(e) => {
                self.metrics.connection_error();
                warn!(error = %e, "Private delivery failed");
            }
        }

        if let Err(e) = channel.close().await {
            debug!(error = %e, "Error closing private channel");
        }
        self.metrics.connection_closed();
    }
}

/// Serve private messages for `name` on `listener` until `shutdown` is cancelled.
pub async fn serve_private(
    listener: TcpListener,
    key: IntegrityKey,
    name: &str,
    inbox: mpsc::Sender<IncomingMessage>,
    shutdown: CancellationToken,
) -> Result<()> {
    PrivateListener::new(name, key)
        .with_shutdown(shutdown)
        .serve(listener, inbox)
        .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    fn key() -> IntegrityKey {
        IntegrityKey::from_bytes(b"pre-shared peer key").unwrap()
    }

    fn pair() -> (
        IntegrityChannel<LineChannel<DuplexStream>>,
        IntegrityChannel<LineChannel<DuplexStream>>,
    ) {
        let (a, b) = tokio::io::duplex(4096);
        (
            IntegrityChannel::new(LineChannel::new(a, 1024), key()),
            IntegrityChannel::new(LineChannel::new(b, 1024), key()),
        )
    }

    #[tokio::test]
    async fn test_clean_exchange() {
        let (mut alice, mut bob) = pair();
        let receiver = tokio::spawn(async move { answer(&mut bob, "bob").await.unwrap() });

        let report = deliver(&mut alice, "alice", "bob", "hello", Duration::from_secs(5))
            .await
            .unwrap();
        let incoming = receiver.await.unwrap();

        assert!(report.is_clean());
        assert_eq!(report.describe(), "bob replied with !ack.");
        assert_eq!(incoming.text, "!msg alice: hello");
        assert!(incoming.authentic);
    }

    #[tokio::test]
    async fn test_mismatched_keys_flag_both_directions() {
        let (a, b) = tokio::io::duplex(4096);
        let mut alice = IntegrityChannel::new(LineChannel::new(a, 1024), key());
        let mut bob = IntegrityChannel::new(
            LineChannel::new(b, 1024),
            IntegrityKey::from_bytes(b"some other peer key").unwrap(),
        );
        let receiver = tokio::spawn(async move { answer(&mut bob, "bob").await.unwrap() });

        let report = deliver(&mut alice, "alice", "bob", "hello", Duration::from_secs(5))
            .await
            .unwrap();
        let incoming = receiver.await.unwrap();

        assert!(!incoming.authentic);
        assert!(report.forward_tampered);
        assert!(report.reply_tampered);
        assert_eq!(report.reply, "!tampered alice: hello");
    }

    #[tokio::test]
    async fn test_silent_receiver_times_out() {
        let (mut alice, _bob) = pair();
        let err = deliver(&mut alice, "alice", "bob", "hi", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::ProtocolError::Timeout));
    }
}
