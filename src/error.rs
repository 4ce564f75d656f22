//! # Error Types
//!
//! Error handling for the channel stack, the handshake and the messaging protocol.
//!
//! ## Error Categories
//! - **Transport**: connection reset, EOF, bind/connect failure, shutdown
//! - **Decoding**: malformed base64, cipher/tag failures; the bytes arrived but are garbage
//! - **Handshake**: challenge mismatch, missing public key, no key configured before send
//! - **Integrity**: HMAC tag mismatch on the tamper-evident protocol (not fatal)
//! - **Config**: invalid configuration or key files
//!
//! Use [`ProtocolError::kind`] to tell these apart and [`ProtocolError::user_message`]
//! for the human-readable text shown to a user.
//!
//! ## Example Usage
//! ```rust
//! use secure_chat_protocol::error::{ErrorKind, ProtocolError};
//!
//! let err = ProtocolError::ConnectionClosed;
//! assert_eq!(err.kind(), ErrorKind::Transport);
//! assert!(err.is_disconnect());
//! assert!(err.user_message().starts_with("Could not connect"));
//! ```

use std::io;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Decoding errors
    pub const ERR_INVALID_BASE64: &str = "Malformed base64 payload";
    pub const ERR_INVALID_UTF8: &str = "Payload is not valid UTF-8";
    pub const ERR_SEAL_FAILED: &str = "Asymmetric encryption failed";
    pub const ERR_OPEN_FAILED: &str = "Asymmetric decryption failed";
    pub const ERR_SEALED_TOO_SHORT: &str = "Asymmetric ciphertext too short";
    pub const ERR_SESSION_DECRYPT: &str = "Session decryption failed";
    pub const ERR_SESSION_ENCRYPT: &str = "Session encryption failed";
    pub const ERR_SEQUENCE_EXHAUSTED: &str = "Session sequence number exhausted";

    /// Channel configuration errors
    pub const ERR_NO_OPPOSITE_KEY: &str = "No public key configured for the remote party";
    pub const ERR_LINE_BREAK: &str = "Payload contains a line break";

    /// Handshake-specific errors
    pub const ERR_INVALID_STATE: &str = "Handshake step invoked in the wrong state";
    pub const ERR_CLIENT_CHALLENGE_MISMATCH: &str =
        "Echoed client challenge does not match the challenge sent";
    pub const ERR_SERVER_CHALLENGE_MISMATCH: &str =
        "Returned server challenge does not match the challenge sent";
    pub const ERR_SERVER_PUBLIC_NOT_FOUND: &str = "Server public key not found";
    pub const ERR_CLIENT_PUBLIC_NOT_FOUND: &str = "No public key on file for principal";
    pub const ERR_MALFORMED_MESSAGE: &str = "Malformed handshake message";
    pub const ERR_INVALID_IDENTITY: &str = "Invalid identity";
    pub const ERR_AUTHENTICATION_REJECTED: &str =
        "Server closed the connection instead of answering the challenge";

    /// Session errors
    pub const ERR_ALREADY_LOGGED_IN: &str = "Already logged in.";
    pub const ERR_NOT_LOGGED_IN: &str = "Not logged in.";
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";

    /// Crypto context errors
    pub const ERR_RNG_UNAVAILABLE: &str = "Operating system RNG unavailable";
}

// ProtocolError is the primary error type for all channel and protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Shutdown requested")]
    Shutdown,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Decoding error: {0}")]
    DecodingError(String),

    #[error("Payload too large: {0} bytes")]
    OversizedPayload(usize),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Authentication tag mismatch")]
    IntegrityMismatch { message: String },

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Crypto context unavailable: {0}")]
    CryptoUnavailable(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Coarse classification of a [`ProtocolError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Decoding,
    Handshake,
    Integrity,
    Config,
    Other,
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Io(_)
            | ProtocolError::TransportError(_)
            | ProtocolError::ConnectionClosed
            | ProtocolError::Shutdown
            | ProtocolError::Timeout => ErrorKind::Transport,
            ProtocolError::DecodingError(_) => ErrorKind::Decoding,
            ProtocolError::HandshakeError(_) => ErrorKind::Handshake,
            ProtocolError::IntegrityMismatch { .. } => ErrorKind::Integrity,
            ProtocolError::ConfigError(_)
            | ProtocolError::CryptoUnavailable(_)
            | ProtocolError::OversizedPayload(_)
            | ProtocolError::InvalidPayload(_) => ErrorKind::Config,
            ProtocolError::SessionError(_) | ProtocolError::Custom(_) => ErrorKind::Other,
        }
    }

    /// True when the peer went away or the connection was cancelled locally.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ProtocolError::ConnectionClosed | ProtocolError::Shutdown | ProtocolError::Io(_)
        )
    }

    /// Human-readable text that keeps "could not connect", "authentication failed"
    /// and "message tampered" apart.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Transport => format!("Could not connect: {self}"),
            ErrorKind::Handshake => format!("Authentication failed: {self}"),
            ErrorKind::Integrity => match self {
                ProtocolError::IntegrityMismatch { message } => {
                    format!("Message tampered: {message}")
                }
                _ => "Message tampered".to_string(),
            },
            ErrorKind::Decoding => format!("Received corrupted data: {self}"),
            ErrorKind::Config => format!("Configuration problem: {self}"),
            ErrorKind::Other => self.to_string(),
        }
    }
}

impl From<LinesCodecError> for ProtocolError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                ProtocolError::TransportError("Line exceeds maximum length".into())
            }
            LinesCodecError::Io(e) => ProtocolError::Io(e),
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages_are_distinct() {
        let connect = ProtocolError::ConnectionClosed.user_message();
        let auth = ProtocolError::HandshakeError(constants::ERR_CLIENT_CHALLENGE_MISMATCH.into())
            .user_message();
        let tampered = ProtocolError::IntegrityMismatch {
            message: "bob: hello".into(),
        }
        .user_message();

        assert!(connect.starts_with("Could not connect"));
        assert!(auth.starts_with("Authentication failed"));
        assert!(tampered.starts_with("Message tampered"));
    }

    #[test]
    fn test_decoding_is_not_transport() {
        let err = ProtocolError::DecodingError(constants::ERR_INVALID_BASE64.into());
        assert_eq!(err.kind(), ErrorKind::Decoding);
        assert!(!err.is_disconnect());
    }
}
