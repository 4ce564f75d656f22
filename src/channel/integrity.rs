//! Integrity-only stage for peer-to-peer messaging.
//!
//! No encryption. Every payload travels as one cleartext line:
//!
//! ```text
//! <base64(HMAC-SHA256(key, payload))> <payload>
//! ```
//!
//! A tag mismatch is an expected protocol outcome rather than a transport
//! failure: [`IntegrityChannel::receive_verified`] hands back the content
//! either way so the caller can show it and answer with a tamper notice.

use async_trait::async_trait;
use tracing::warn;

use crate::channel::base64::{decode, encode};
use crate::channel::Channel;
use crate::crypto::IntegrityKey;
use crate::error::{ProtocolError, Result};

/// Outcome of receiving one tagged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verified {
    Authentic(Vec<u8>),
    /// The tag did not match, or the line carried no well-formed tag.
    Tampered(Vec<u8>),
}

impl Verified {
    pub fn is_authentic(&self) -> bool {
        matches!(self, Verified::Authentic(_))
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Verified::Authentic(p) | Verified::Tampered(p) => p,
        }
    }

    pub fn into_payload(self) -> Vec<u8> {
        match self {
            Verified::Authentic(p) | Verified::Tampered(p) => p,
        }
    }
}

pub struct IntegrityChannel<C> {
    inner: C,
    key: IntegrityKey,
    closed: bool,
}

impl<C: Channel> IntegrityChannel<C> {
    pub fn new(inner: C, key: IntegrityKey) -> Self {
        Self {
            inner,
            key,
            closed: false,
        }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    /// Receive one line and check its tag. Transport and shutdown errors are
    /// still returned as errors.
    pub async fn receive_verified(&mut self) -> Result<Verified> {
        let line = self.inner.receive().await?;
        Ok(self.verify_line(line))
    }

    fn verify_line(&self, line: Vec<u8>) -> Verified {
        let Some(split) = line.iter().position(|&b| b == b' ') else {
            warn!("Tagged line carries no separator");
            return Verified::Tampered(line);
        };
        let payload = line[split + 1..].to_vec();
        match decode(&line[..split]) {
            Ok(tag) if self.key.verify(&payload, &tag) => Verified::Authentic(payload),
            _ => {
                warn!(len = payload.len(), "Message authentication tag mismatch");
                Verified::Tampered(payload)
            }
        }
    }
}

#[async_trait]
impl<C: Channel> Channel for IntegrityChannel<C> {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let tag = encode(&self.key.tag(payload)?);
        let mut line = Vec::with_capacity(tag.len() + 1 + payload.len());
        line.extend_from_slice(tag.as_bytes());
        line.push(b' ');
        line.extend_from_slice(payload);
        self.inner.send(&line).await
    }

    /// A tag mismatch surfaces as [`ProtocolError::IntegrityMismatch`].
    async fn receive(&mut self) -> Result<Vec<u8>> {
        match self.receive_verified().await? {
            Verified::Authentic(payload) => Ok(payload),
            Verified::Tampered(payload) => Err(ProtocolError::IntegrityMismatch {
                message: String::from_utf8_lossy(&payload).into_owned(),
            }),
        }
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
    use tokio::io::DuplexStream;

    fn key() -> IntegrityKey {
        IntegrityKey::from_bytes(b"shared-secret-for-tests").unwrap()
    }

    fn pair() -> (IntegrityChannel<LineChannel<DuplexStream>>, LineChannel<DuplexStream>) {
        let (a, b) = tokio::io::duplex(4096);
        (
            IntegrityChannel::new(LineChannel::new(a, 1024), key()),
            LineChannel::new(b, 1024),
        )
    }

    #[tokio::test]
    async fn test_wire_format_is_tag_space_message() {
        let (mut tagged, mut raw) = pair();
        tagged.send(b"!msg bob: hello").await.unwrap();

        let line = String::from_utf8(raw.receive().await.unwrap()).unwrap();
        let (tag, body) = line.split_once(' ').unwrap();
        assert_eq!(body, "!msg bob: hello");
        assert_eq!(decode(tag.as_bytes()).unwrap(), key().tag(body.as_bytes()).unwrap());
    }

    #[tokio::test]
    async fn test_altered_body_is_tampered_but_delivered() {
        let (mut tagged, mut raw) = pair();
        let tag = encode(&key().tag(b"!msg bob: hello").unwrap());
        raw.send(format!("{tag} !msg bob: hellp").as_bytes()).await.unwrap();

        let verified = tagged.receive_verified().await.unwrap();
        assert_eq!(verified, Verified::Tampered(b"!msg bob: hellp".to_vec()));
    }

    #[tokio::test]
    async fn test_receive_reports_integrity_mismatch() {
        let (mut tagged, mut raw) = pair();
        raw.send(b"no-tag-here").await.unwrap();
        let err = tagged.receive().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(err.user_message().starts_with("Message tampered"));
    }

    #[tokio::test]
    async fn test_authentic_roundtrip() {
        let (a, b) = tokio::io::duplex(4096);
        let mut left = IntegrityChannel::new(LineChannel::new(a, 1024), key());
        let mut right = IntegrityChannel::new(LineChannel::new(b, 1024), key());
        left.send(b"bob replied with !ack.").await.unwrap();
        assert_eq!(right.receive().await.unwrap(), b"bob replied with !ack.");
    }
}
