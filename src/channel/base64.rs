//! Base64 text encoding stage.
//!
//! Lets binary ciphertext ride over the line-oriented transport. Uses the
//! standard alphabet with padding.

use async_trait::async_trait;
use ::base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::channel::Channel;
use crate::error::{constants, ProtocolError, Result};

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Malformed input is a `DecodingError`, never a transport error.
pub fn decode(text: &[u8]) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|_| ProtocolError::DecodingError(constants::ERR_INVALID_BASE64.into()))
}

#[derive(Debug)]
pub struct Base64Channel<C> {
    inner: C,
    closed: bool,
}

impl<C: Channel> Base64Channel<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    pub fn get_ref(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

#[async_trait]
impl<C: Channel> Channel for Base64Channel<C> {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let text = encode(payload);
        self.inner.send(text.as_bytes()).await
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        let text = self.inner.receive().await?;
        decode(&text)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::channel::LineChannel;
    use crate::error::ErrorKind;

    #[test]
    fn test_encode_known_vector() {
        assert_eq!(encode(b"hello"), "aGVsbG8=");
        assert_eq!(decode(b"aGVsbG8=").unwrap(), b"hello");
    }

    #[test]
    fn test_malformed_input_is_decoding_error() {
        let err = decode(b"not*base64!").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decoding);
    }

    #[tokio::test]
    async fn test_binary_payload_over_lines() {
        let (a, b) = tokio::io::duplex(4096);
        let mut left = Base64Channel::new(LineChannel::new(a, 1024));
        let mut right = Base64Channel::new(LineChannel::new(b, 1024));

        let payload = [0u8, b'\n', 0xff, b'\r', 42];
        left.send(&payload).await.unwrap();
        assert_eq!(right.receive().await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_garbage_line_is_decoding_error() {
        let (a, b) = tokio::io::duplex(4096);
        let mut raw = LineChannel::new(a, 1024);
        let mut decoded = Base64Channel::new(LineChannel::new(b, 1024));

        raw.send(b"%%% not base64").await.unwrap();
        let err = decoded.receive().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decoding);
        assert!(!err.is_disconnect());
    }
}
