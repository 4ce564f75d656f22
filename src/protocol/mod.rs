//! # Protocol Layer
//!
//! What travels over the channel stack.
//!
//! - [`message`]: the three handshake wire messages
//! - [`handshake`]: initiator/responder state machines and the async drivers that
//!   upgrade an asymmetric chain into a symmetric session
//! - [`session`]: one connection's `Unauthenticated -> Authenticated -> Closed`
//!   lifecycle, including logout and re-authentication
//! - [`private`]: HMAC-tagged peer messages and their acknowledgments
//! - [`dispatcher`]: routes authenticated application lines to handlers

pub mod dispatcher;
pub mod handshake;
pub mod message;
pub mod private;
pub mod session;


pub use self::dispatcher::{Dispatcher, UNKNOWN_REQUEST};
pub use self::handshake::{
    initiate, respond, respond_idle, HandshakeState, InitiatorHandshake, ResponderHandshake, SecureSession,
};
pub use self::message::HandshakeMessage;
pub use self::private::{DeliveryReport, IncomingMessage};
pub use self::session::{Session, SessionState};
