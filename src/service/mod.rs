//! # Services
//!
//! Runnable endpoints built on the channel stack and protocol layer.
//!
//! - [`ChatServer`]: accept loop, one task per connection, shared [`SessionTable`]
//! - [`SecureClient`]: authenticated request/reply connection to a server
//! - [`peer`]: tamper-evident private messages between clients

pub mod client;
pub mod peer;
pub mod server;
pub mod sessions;

pub use self::client::SecureClient;
pub use self::peer::{send_private, serve_private, PrivateListener};
pub use self::server::{ChatServer, LOGGED_OUT, LOGOUT};
pub use self::sessions::{ConnectionId, SessionTable, SessionTableStats};
