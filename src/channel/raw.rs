//! Raw line transport.
//!
//! Newline-delimited UTF-8 frames over any byte stream. This is the root of
//! every channel chain: exactly one per connection.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::channel::Channel;
use crate::error::{constants, ProtocolError, Result};

pub struct LineChannel<S> {
    framed: Framed<S, LinesCodec>,
    shutdown: CancellationToken,
    closed: bool,
}

impl LineChannel<TcpStream> {
    #[instrument(skip(addr))]
    pub async fn connect<A: ToSocketAddrs>(addr: A, max_line_length: usize) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            ProtocolError::TransportError(format!("Failed to connect: {e}"))
        })?;
        stream.set_nodelay(true)?;
        debug!(peer = ?stream.peer_addr().ok(), "Connected");
        Ok(Self::new(stream, max_line_length))
    }
}

impl<S> LineChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, max_line_length: usize) -> Self {
        Self {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(max_line_length)),
            shutdown: CancellationToken::new(),
            closed: false,
        }
    }

    /// Observe `token` between reads; cancelling it makes a pending or future
    /// `receive` return [`ProtocolError::Shutdown`].
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl<S> Channel for LineChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        if self.closed {
            return Err(ProtocolError::ConnectionClosed);
        }
        let line = std::str::from_utf8(payload)
            .map_err(|_| ProtocolError::InvalidPayload(constants::ERR_INVALID_UTF8.into()))?;
        if line.contains(['\n', '\r']) {
            return Err(ProtocolError::InvalidPayload(constants::ERR_LINE_BREAK.into()));
        }
        self.framed.send(line).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        if self.closed {
            return Err(ProtocolError::ConnectionClosed);
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ProtocolError::Shutdown),
            next = self.framed.next() => match next {
                Some(Ok(line)) => Ok(line.into_bytes()),
                Some(Err(e)) => Err(e.into()),
                None => Err(ProtocolError::ConnectionClosed),
            },
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // the peer may already be gone
        if let Err(e) = SinkExt::<&str>::close(&mut self.framed).await {
            debug!(error = %e, "Transport shutdown failed");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pair() -> (LineChannel<tokio::io::DuplexStream>, LineChannel<tokio::io::DuplexStream>) {
        let (a, b) = tokio::io::duplex(1024);
        (LineChannel::new(a, 256), LineChannel::new(b, 256))
    }

    #[tokio::test]
    async fn test_lines_roundtrip() {
        let (mut left, mut right) = pair();
        left.send(b"!list").await.unwrap();
        left.send(b"").await.unwrap();
        assert_eq!(right.receive().await.unwrap(), b"!list");
        assert_eq!(right.receive().await.unwrap(), b"");
    }

    #[tokio::test]
    async fn test_line_break_rejected() {
        let (mut left, _right) = pair();
        let err = left.send(b"two\nlines").await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_peer_close_is_connection_closed() {
        let (mut left, mut right) = pair();
        left.close().await.unwrap();
        drop(left);
        let err = right.receive().await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut left, _right) = pair();
        left.close().await.unwrap();
        left.close().await.unwrap();
        assert!(left.is_closed());
        assert!(matches!(
            left.send(b"late").await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_cancel_unblocks_receive() {
        let (left, _right) = pair();
        let token = CancellationToken::new();
        let mut left = left.with_shutdown(token.clone());

        let waiter = tokio::spawn(async move { left.receive().await });
        token.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, ProtocolError::Shutdown));
    }

    #[tokio::test]
    async fn test_overlong_line_is_transport_error() {
        let (a, b) = tokio::io::duplex(4096);
        let mut left = LineChannel::new(a, 2048);
        let mut right = LineChannel::new(b, 16);
        left.send(&[b'x'; 64]).await.unwrap();
        let err = right.receive().await.unwrap_err();
        assert!(matches!(err, ProtocolError::TransportError(_)));
    }
}
