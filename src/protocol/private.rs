//! Tamper-evident peer-to-peer messages.
//!
//! Two clients sharing an integrity key exchange one message and one
//! acknowledgment over an [`IntegrityChannel`](crate::channel::IntegrityChannel):
//!
//! ```text
//! sender   -> <tag> !msg <sender>: <text>
//! receiver -> <tag> <receiver> replied with !ack.      (message authentic)
//! receiver -> <tag> !tampered <sender>: <text>         (message altered)
//! ```
//!
//! Both lines are checked independently, so the sender can learn that its
//! message was altered, that the acknowledgment was altered, or both.

use std::fmt;

use crate::channel::Verified;

pub const MSG: &str = "!msg";
pub const ACK: &str = "!ack";
pub const TAMPERED: &str = "!tampered";

/// Body of a private message from `sender`.
pub fn compose(sender: &str, text: &str) -> String {
    format!("{MSG} {sender}: {text}")
}

/// Acknowledgment sent by `receiver` for an authentic message.
pub fn ack(receiver: &str) -> String {
    format!("{receiver} replied with {ACK}.")
}

/// Tamper notice echoing what actually arrived, minus the command token.
pub fn tampered(received: &str) -> String {
    let echo = received
        .strip_prefix(MSG)
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .unwrap_or(received);
    format!("{TAMPERED} {echo}")
}

/// Reply the receiver sends for a verified incoming message.
pub fn reply_for(receiver: &str, incoming: &Verified) -> String {
    match incoming {
        Verified::Authentic(_) => ack(receiver),
        Verified::Tampered(body) => tampered(&String::from_utf8_lossy(body)),
    }
}

/// A message as handed to the receiving user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub text: String,
    /// False when the tag did not verify; the text may have been altered.
    pub authentic: bool,
}

impl IncomingMessage {
    pub fn from_verified(verified: Verified) -> Self {
        let authentic = verified.is_authentic();
        Self {
            text: String::from_utf8_lossy(&verified.into_payload()).into_owned(),
            authentic,
        }
    }
}

/// What the sender learned from one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub peer: String,
    /// The acknowledgment as received.
    pub reply: String,
    /// The receiver reported that our message failed verification.
    pub forward_tampered: bool,
    /// The acknowledgment itself failed verification.
    pub reply_tampered: bool,
}

impl DeliveryReport {
    pub fn from_reply(peer: &str, reply: Verified) -> Self {
        let reply_tampered = !reply.is_authentic();
        let reply = String::from_utf8_lossy(&reply.into_payload()).into_owned();
        Self {
            peer: peer.to_string(),
            forward_tampered: reply.starts_with(TAMPERED),
            reply,
            reply_tampered,
        }
    }

    pub fn is_clean(&self) -> bool {
        !self.forward_tampered && !self.reply_tampered
    }

    /// Human-readable summary shown to the sending user.
    pub fn describe(&self) -> String {
        let mut out = if self.forward_tampered {
            format!("The message sent to {} has been tampered!", self.peer)
        } else {
            self.reply.clone()
        };
        if self.reply_tampered {
            out.push_str(&format!(
                "\nThe confirmation message received from {} has been changed!",
                self.peer
            ));
        }
        out
    }
}

impl fmt::Display for DeliveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
