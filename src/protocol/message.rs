//! Handshake wire messages.
//!
//! ```text
//! 1. A -> B  (sealed)     !authenticate <identity> <base64 Ca>
//! 2. B -> A  (sealed)     !ok <base64 Ca> <base64 Cb> <base64 K> <base64 IV>
//! 3. A -> B  (session)    <base64 Cb>
//! ```

use crate::crypto::keys::validate_principal;
use crate::crypto::{Challenge, Iv, SessionKey, SessionSecrets};
use crate::error::{constants, ProtocolError, Result};

pub const AUTHENTICATE: &str = "!authenticate";
pub const OK: &str = "!ok";

fn malformed(detail: &str) -> ProtocolError {
    ProtocolError::HandshakeError(format!("{}: {detail}", constants::ERR_MALFORMED_MESSAGE))
}

/// Splits `text` on single spaces and checks the leading command token.
fn fields<'a>(text: &'a str, command: &str, count: usize) -> Result<Vec<&'a str>> {
    let parts: Vec<&str> = text.split(' ').collect();
    if parts.first() != Some(&command) {
        return Err(malformed(&format!("expected {command}")));
    }
    if parts.len() != count + 1 || parts.iter().any(|p| p.is_empty()) {
        return Err(malformed(&format!("{command} takes {count} arguments")));
    }
    Ok(parts[1..].to_vec())
}

#[derive(Debug, Clone)]
pub enum HandshakeMessage {
    Authenticate {
        identity: String,
        challenge: Challenge,
    },
    Ok {
        client_challenge: Challenge,
        server_challenge: Challenge,
        key: SessionKey,
        iv: Iv,
    },
    Confirm(Challenge),
}

impl HandshakeMessage {
    pub fn encode(&self) -> String {
        match self {
            HandshakeMessage::Authenticate {
                identity,
                challenge,
            } => format!("{AUTHENTICATE} {identity} {}", challenge.to_base64()),
            HandshakeMessage::Ok {
                client_challenge,
                server_challenge,
                key,
                iv,
            } => format!(
                "{OK} {} {} {} {}",
                client_challenge.to_base64(),
                server_challenge.to_base64(),
                key.to_base64(),
                iv.to_base64()
            ),
            HandshakeMessage::Confirm(challenge) => challenge.to_base64(),
        }
    }

    pub fn parse_authenticate(text: &str) -> Result<Self> {
        let parts = fields(text, AUTHENTICATE, 2)?;
        validate_principal(parts[0])?;
        Ok(HandshakeMessage::Authenticate {
            identity: parts[0].to_string(),
            challenge: Challenge::from_base64(parts[1])?,
        })
    }

    pub fn parse_ok(text: &str) -> Result<Self> {
        let parts = fields(text, OK, 4)?;
        Ok(HandshakeMessage::Ok {
            client_challenge: Challenge::from_base64(parts[0])?,
            server_challenge: Challenge::from_base64(parts[1])?,
            key: SessionKey::from_base64(parts[2])?,
            iv: Iv::from_base64(parts[3])?,
        })
    }

    pub fn parse_confirm(text: &str) -> Result<Self> {
        Ok(HandshakeMessage::Confirm(Challenge::from_base64(text.trim())?))
    }

    pub(crate) fn ok(
        client_challenge: Challenge,
        server_challenge: Challenge,
        secrets: &SessionSecrets,
    ) -> Self {
        HandshakeMessage::Ok {
            client_challenge,
            server_challenge,
            key: secrets.key().clone(),
            iv: *secrets.iv(),
        }
    }
}
