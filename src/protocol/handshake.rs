//! Challenge-response handshake that upgrades an asymmetric channel to a session.
//!
//! The initiator (client) knows its own private key, the server's pinned public
//! key and its own identity. The responder (server) knows its own private key and
//! looks up the initiator's public key by the identity it declares.
//!
//! ```text
//! A                                          B
//! | -- sealed: !authenticate <id> <Ca> -----> |   A: Init -> ChallengeSent
//! | <-- sealed: !ok <Ca> <Cb> <K> <IV> ------ |   B: Init -> AwaitingConfirmation
//! |    (A checks Ca, installs K/IV)           |   A: ChallengeSent -> Established
//! | -- session: <Cb> ----------------------->  |
//! |                          (B checks Cb)     |   B: AwaitingConfirmation -> Established
//! ```
//!
//! **Per-session state.** Each side keeps its progress in its own state struct
//! ([`InitiatorHandshake`], [`ResponderHandshake`]); nothing is shared between
//! connections. Any failed step moves the struct to [`HandshakeState::Failed`],
//! which is terminal. Challenges held in the state are zeroized on drop.
//!
//! The async drivers [`initiate`] and [`respond`] run the whole exchange over a
//! channel chain. On failure they close the chain and return the error; the
//! caller decides whether to reconnect.

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::channel::{AsymmetricChannel, Channel, ChannelExt, KeyedChannel, SymmetricChannel};
use crate::crypto::{Challenge, CryptoContext, KeyStore, Role, SessionSecrets};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::HandshakeMessage;
use crate::utils::metrics::Timer;
use crate::utils::timeout::with_timeout_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    ChallengeSent,
    AwaitingConfirmation,
    Established,
    Failed,
}

fn invalid_state() -> ProtocolError {
    ProtocolError::HandshakeError(constants::ERR_INVALID_STATE.into())
}

/// Initiator-side handshake state
pub struct InitiatorHandshake {
    identity: String,
    state: HandshakeState,
    client_challenge: Option<Challenge>,
}

impl InitiatorHandshake {
    pub fn new(identity: &str) -> Result<Self> {
        crate::crypto::keys::validate_principal(identity)?;
        Ok(Self {
            identity: identity.to_string(),
            state: HandshakeState::Init,
            client_challenge: None,
        })
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Produce message 1 with a fresh challenge.
    pub fn start(&mut self, ctx: &CryptoContext) -> Result<HandshakeMessage> {
        let challenge = ctx.challenge()?;
        self.start_with(challenge)
    }

    /// Produce message 1 with a caller-chosen challenge.
    pub fn start_with(&mut self, challenge: Challenge) -> Result<HandshakeMessage> {
        if self.state != HandshakeState::Init {
            self.state = HandshakeState::Failed;
            return Err(invalid_state());
        }
        self.client_challenge = Some(challenge.clone());
        self.state = HandshakeState::ChallengeSent;
        debug!(identity = %self.identity, "Initiator sent challenge");
        Ok(HandshakeMessage::Authenticate {
            identity: self.identity.clone(),
            challenge,
        })
    }

    /// Check message 2 and produce message 3.
    ///
    /// Fails with `HandshakeError` if the echoed challenge differs from the one
    /// sent; no session material is returned in that case.
    pub fn on_reply(&mut self, text: &str) -> Result<(SessionSecrets, HandshakeMessage)> {
        let result = self.verify_reply(text);
        self.state = match result {
            Ok(_) => HandshakeState::Established,
            Err(_) => HandshakeState::Failed,
        };
        result
    }

    fn verify_reply(&mut self, text: &str) -> Result<(SessionSecrets, HandshakeMessage)> {
        if self.state != HandshakeState::ChallengeSent {
            return Err(invalid_state());
        }
        let sent = self.client_challenge.take().ok_or_else(invalid_state)?;

        let HandshakeMessage::Ok {
            client_challenge,
            server_challenge,
            key,
            iv,
        } = HandshakeMessage::parse_ok(text)?
        else {
            return Err(invalid_state());
        };

        if !client_challenge.matches(&sent) {
            warn!(identity = %self.identity, "Echoed client challenge mismatch");
            return Err(ProtocolError::HandshakeError(
                constants::ERR_CLIENT_CHALLENGE_MISMATCH.into(),
            ));
        }

        debug!(identity = %self.identity, "Initiator verified server reply");
        Ok((
            SessionSecrets::new(key, iv),
            HandshakeMessage::Confirm(server_challenge),
        ))
    }
}

/// Responder-side handshake state
pub struct ResponderHandshake {
    state: HandshakeState,
    identity: Option<String>,
    server_challenge: Option<Challenge>,
}

impl Default for ResponderHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponderHandshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Init,
            identity: None,
            server_challenge: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Identity declared in message 1. Not authenticated until
    /// [`on_confirm`](Self::on_confirm) succeeds.
    pub fn declared_identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Parse message 1, returning the declared identity and its challenge.
    pub fn on_authenticate(&mut self, text: &str) -> Result<(String, Challenge)> {
        if self.state != HandshakeState::Init || self.identity.is_some() {
            self.state = HandshakeState::Failed;
            return Err(invalid_state());
        }
        match HandshakeMessage::parse_authenticate(text) {
            Ok(HandshakeMessage::Authenticate {
                identity,
                challenge,
            }) => {
                debug!(identity = %identity, "Responder received authenticate");
                self.identity = Some(identity.clone());
                Ok((identity, challenge))
            }
            Ok(_) => {
                self.state = HandshakeState::Failed;
                Err(invalid_state())
            }
            Err(e) => {
                self.state = HandshakeState::Failed;
                Err(e)
            }
        }
    }

    /// Draw fresh session material and produce message 2.
    pub fn reply(
        &mut self,
        ctx: &CryptoContext,
        client_challenge: Challenge,
    ) -> Result<(SessionSecrets, HandshakeMessage)> {
        if self.state != HandshakeState::Init || self.identity.is_none() {
            self.state = HandshakeState::Failed;
            return Err(invalid_state());
        }
        let generated = ctx
            .challenge()
            .and_then(|cb| ctx.session_secrets().map(|secrets| (cb, secrets)));
        let (server_challenge, secrets) = match generated {
            Ok(v) => v,
            Err(e) => {
                self.state = HandshakeState::Failed;
                return Err(e);
            }
        };

        self.server_challenge = Some(server_challenge.clone());
        self.state = HandshakeState::AwaitingConfirmation;
        let message = HandshakeMessage::ok(client_challenge, server_challenge, &secrets);
        Ok((secrets, message))
    }

    /// Check message 3. On success the declared identity is returned and may be
    /// bound to the connection.
    pub fn on_confirm(&mut self, text: &str) -> Result<String> {
        let result = self.verify_confirm(text);
        self.state = match result {
            Ok(_) => HandshakeState::Established,
            Err(_) => HandshakeState::Failed,
        };
        result
    }

    fn verify_confirm(&mut self, text: &str) -> Result<String> {
        if self.state != HandshakeState::AwaitingConfirmation {
            return Err(invalid_state());
        }
        let expected = self.server_challenge.take().ok_or_else(invalid_state)?;
        let HandshakeMessage::Confirm(returned) = HandshakeMessage::parse_confirm(text)? else {
            return Err(invalid_state());
        };
        if !returned.matches(&expected) {
            warn!(identity = ?self.identity, "Returned server challenge mismatch");
            return Err(ProtocolError::HandshakeError(
                constants::ERR_SERVER_CHALLENGE_MISMATCH.into(),
            ));
        }
        self.identity.clone().ok_or_else(invalid_state)
    }
}

/// A completed handshake: the session channel and the authenticated identity.
pub struct SecureSession<C> {
    channel: SymmetricChannel<C>,
    identity: String,
    secrets: SessionSecrets,
}

impl<C: Channel> SecureSession<C> {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Key and IV agreed for this session.
    pub fn secrets(&self) -> &SessionSecrets {
        &self.secrets
    }

    pub fn channel_mut(&mut self) -> &mut SymmetricChannel<C> {
        &mut self.channel
    }

    pub fn into_parts(self) -> (SymmetricChannel<C>, String) {
        (self.channel, self.identity)
    }
}

async fn abort<C: Channel>(channel: &mut C, err: ProtocolError) -> ProtocolError {
    warn!(error = %err, "Handshake failed");
    if let Err(e) = channel.close().await {
        debug!(error = %e, "Closing channel after failed handshake");
    }
    err
}

/// A responder that hangs up after message 1 refused the login: it did not know
/// the identity or could not open the sealed challenge.
fn rejected(err: ProtocolError) -> ProtocolError {
    match err {
        ProtocolError::ConnectionClosed | ProtocolError::Io(_) => ProtocolError::HandshakeError(
            format!("{} ({err})", constants::ERR_AUTHENTICATION_REJECTED),
        ),
        other => other,
    }
}

/// Run the initiator side over `chain`, whose opposite key must be the
/// responder's pinned public key.
#[instrument(skip(chain, timeout))]
pub async fn initiate<C: Channel>(
    mut chain: AsymmetricChannel<C>,
    identity: &str,
    timeout: Duration,
) -> Result<SecureSession<C>> {
    let _timer = Timer::start("handshake_initiate");

    if chain.opposite_key().is_none() {
        let err = ProtocolError::HandshakeError(constants::ERR_SERVER_PUBLIC_NOT_FOUND.into());
        return Err(abort(&mut chain, err).await);
    }

    let ctx = chain.context().clone();
    let mut handshake = match InitiatorHandshake::new(identity) {
        Ok(handshake) => handshake,
        Err(e) => return Err(abort(&mut chain, e).await),
    };

    let exchanged = async {
        let hello = handshake.start(&ctx)?;
        chain.send_text(&hello.encode()).await?;
        let reply = with_timeout_error(chain.receive_text(), timeout)
            .await
            .map_err(rejected)?;
        handshake.on_reply(&reply)
    }
    .await;
    let (secrets, confirm) = match exchanged {
        Ok(v) => v,
        Err(e) => return Err(abort(&mut chain, e).await),
    };

    let mut channel = SymmetricChannel::new(chain.into_inner(), &secrets, Role::Initiator);
    if let Err(e) = channel.send_text(&confirm.encode()).await {
        return Err(abort(&mut channel, e).await);
    }

    debug!("Initiator handshake established");
    Ok(SecureSession {
        channel,
        identity: identity.to_string(),
        secrets,
    })
}

/// Run the responder side over `chain`. The initiator's public key is looked up
/// in `keys` by the identity it declares.
pub async fn respond<C: Channel>(
    chain: AsymmetricChannel<C>,
    keys: &dyn KeyStore,
    timeout: Duration,
) -> Result<SecureSession<C>> {
    run_responder(chain, keys, timeout, Some(timeout)).await
}

/// Like [`respond`], but message 1 is awaited without a deadline; `timeout`
/// starts once it arrives. A connection that logged out may sit idle here until
/// it authenticates again or its shutdown token is cancelled.
pub async fn respond_idle<C: Channel>(
    chain: AsymmetricChannel<C>,
    keys: &dyn KeyStore,
    timeout: Duration,
) -> Result<SecureSession<C>> {
    run_responder(chain, keys, timeout, None).await
}

#[instrument(skip_all)]
async fn run_responder<C: Channel>(
    mut chain: AsymmetricChannel<C>,
    keys: &dyn KeyStore,
    timeout: Duration,
    first_line: Option<Duration>,
) -> Result<SecureSession<C>> {
    let ctx = chain.context().clone();
    let mut handshake = ResponderHandshake::new();

    let received = match first_line {
        Some(limit) => with_timeout_error(chain.receive_text(), limit).await,
        None => chain.receive_text().await,
    };
    let hello = match received {
        Ok(hello) => hello,
        Err(e) => return Err(abort(&mut chain, e).await),
    };
    let _timer = Timer::start("handshake_respond");

    let replied = async {
        let (identity, client_challenge) = handshake.on_authenticate(&hello)?;
        let client_key = keys.public_key(&identity)?;
        chain.set_opposite_key(client_key);
        let (secrets, ok) = handshake.reply(&ctx, client_challenge)?;
        chain.send_text(&ok.encode()).await?;
        Ok::<_, ProtocolError>(secrets)
    }
    .await;
    let secrets = match replied {
        Ok(v) => v,
        Err(e) => return Err(abort(&mut chain, e).await),
    };

    let mut channel = SymmetricChannel::new(chain.into_inner(), &secrets, Role::Responder);
    let confirmed = async {
        let text = with_timeout_error(channel.receive_text(), timeout).await?;
        handshake.on_confirm(&text)
    }
    .await;
    let identity = match confirmed {
        Ok(identity) => identity,
        Err(e) => return Err(abort(&mut channel, e).await),
    };

    debug!(identity = %identity, "Responder handshake established");
    Ok(SecureSession {
        channel,
        identity,
        secrets,
    })
}
