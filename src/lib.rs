//! # Secure Chat Protocol
//!
//! Layered secure channels for line-oriented chat services.
//!
//! A connection is a linear chain of channel wrappers rooted at one line-delimited
//! transport. Each wrapper adds exactly one transform:
//!
//! ```text
//! LineChannel -> Base64Channel -> AsymmetricChannel      (handshake)
//! LineChannel -> Base64Channel -> SymmetricChannel       (authenticated session)
//! LineChannel -> IntegrityChannel                        (peer-to-peer messages)
//! ```
//!
//! The challenge-response handshake in [`protocol::handshake`] upgrades an
//! asymmetric chain into a symmetric session and binds the initiator's identity
//! on the responder. Private messages between clients skip the handshake and carry
//! an HMAC tag so either side can detect tampering.
//!
//! ## Modules
//! - [`channel`]: the `Channel` trait and its five variants
//! - [`crypto`]: crypto context, key material, primitives
//! - [`protocol`]: handshake state machine, wire messages, session lifecycle,
//!   tamper-evident messaging, line dispatcher
//! - [`service`]: chat server, secure client, private-message listener
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging and metrics

pub mod channel;
pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod service;
pub mod utils;

pub use error::{ErrorKind, ProtocolError, Result};
