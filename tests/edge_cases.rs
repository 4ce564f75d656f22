#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for the channel stack and protocol helpers
//! Boundary payloads, misconfiguration, closed channels and malformed input

use secure_chat_protocol::channel::{
    AsymmetricChannel, Base64Channel, Channel, ChannelExt, IntegrityChannel, KeyedChannel,
    LineChannel, SymmetricChannel,
};
use secure_chat_protocol::crypto::sealed::MAX_SEALED_PLAINTEXT;
use secure_chat_protocol::crypto::{
    CryptoContext, IntegrityKey, KeyStore, MemoryKeyStore, PrivateKey, Role,
};
use secure_chat_protocol::error::{constants, ErrorKind, ProtocolError};
use secure_chat_protocol::protocol::dispatcher::{Dispatcher, UNKNOWN_REQUEST};
use secure_chat_protocol::protocol::private::{self, DeliveryReport};
use secure_chat_protocol::protocol::HandshakeMessage;
use tokio::io::DuplexStream;

type Encoded = Base64Channel<LineChannel<DuplexStream>>;

fn encoded_pair(capacity: usize) -> (Encoded, Encoded) {
    let (a, b) = tokio::io::duplex(capacity);
    (
        Base64Channel::new(LineChannel::new(a, capacity)),
        Base64Channel::new(LineChannel::new(b, capacity)),
    )
}

// ============================================================================
// ASYMMETRIC STAGE
// ============================================================================

#[tokio::test]
async fn test_send_without_opposite_key_is_config_error() {
    let ctx = CryptoContext::new().unwrap();
    let (a, _b) = encoded_pair(4096);
    let mut channel = AsymmetricChannel::new(a, ctx.clone(), PrivateKey::generate(&ctx).unwrap());

    let err = channel.send(b"!authenticate alice x").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().contains(constants::ERR_NO_OPPOSITE_KEY));
}

#[tokio::test]
async fn test_sealed_payload_limit() {
    let ctx = CryptoContext::new().unwrap();
    let receiver_key = PrivateKey::generate(&ctx).unwrap();
    let (a, b) = encoded_pair(8192);
    let mut sender = AsymmetricChannel::new(a, ctx.clone(), PrivateKey::generate(&ctx).unwrap())
        .with_opposite_key(receiver_key.public_key());
    let mut receiver = AsymmetricChannel::new(b, ctx.clone(), receiver_key);

    let largest = vec![b'x'; MAX_SEALED_PLAINTEXT];
    sender.send(&largest).await.unwrap();
    assert_eq!(receiver.receive().await.unwrap(), largest);

    let too_large = vec![b'x'; MAX_SEALED_PLAINTEXT + 1];
    let err = sender.send(&too_large).await.unwrap_err();
    assert!(matches!(err, ProtocolError::OversizedPayload(n) if n == MAX_SEALED_PLAINTEXT + 1));
}

#[tokio::test]
async fn test_repeated_seals_differ_on_the_wire() {
    let ctx = CryptoContext::new().unwrap();
    let receiver_key = PrivateKey::generate(&ctx).unwrap();
    let (a, mut wire) = encoded_pair(8192);
    let mut sender = AsymmetricChannel::new(a, ctx.clone(), PrivateKey::generate(&ctx).unwrap());
    sender.set_opposite_key(receiver_key.public_key());

    sender.send(b"same").await.unwrap();
    sender.send(b"same").await.unwrap();
    assert_ne!(wire.receive().await.unwrap(), wire.receive().await.unwrap());
}

#[tokio::test]
async fn test_wrong_private_key_is_decoding_error() {
    let ctx = CryptoContext::new().unwrap();
    let intended = PrivateKey::generate(&ctx).unwrap();
    let (a, b) = encoded_pair(4096);
    let mut sender = AsymmetricChannel::new(a, ctx.clone(), PrivateKey::generate(&ctx).unwrap())
        .with_opposite_key(intended.public_key());
    let mut eavesdropper =
        AsymmetricChannel::new(b, ctx.clone(), PrivateKey::generate(&ctx).unwrap());

    sender.send(b"secret").await.unwrap();
    let err = eavesdropper.receive().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decoding);
    assert!(!err.is_disconnect());
}

// ============================================================================
// ENCODING AND TRANSPORT
// ============================================================================

#[tokio::test]
async fn test_empty_payload_survives_every_stage() {
    let (mut a, mut b) = encoded_pair(1024);
    a.send(b"").await.unwrap();
    assert!(b.receive().await.unwrap().is_empty());

    let ctx = CryptoContext::new().unwrap();
    let secrets = ctx.session_secrets().unwrap();
    let (x, y) = encoded_pair(1024);
    let mut left = SymmetricChannel::new(x, &secrets, Role::Initiator);
    let mut right = SymmetricChannel::new(y, &secrets, Role::Responder);
    left.send(b"").await.unwrap();
    assert!(right.receive().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_garbage_line_is_decoding_not_transport() {
    let (a, b) = tokio::io::duplex(1024);
    let mut raw = LineChannel::new(a, 1024);
    let mut decoded = Base64Channel::new(LineChannel::new(b, 1024));

    raw.send(b"%%% not base64 %%%").await.unwrap();
    let err = decoded.receive().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decoding);

    // the connection is still usable afterwards
    raw.send(b"aGk=").await.unwrap();
    assert_eq!(decoded.receive().await.unwrap(), b"hi");
}

#[tokio::test]
async fn test_peer_disconnect_is_transport_error() {
    let (mut a, mut b) = encoded_pair(1024);
    a.close().await.unwrap();
    drop(a);

    let err = b.receive().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.is_disconnect());
}

#[tokio::test]
async fn test_close_propagates_and_is_idempotent() {
    let ctx = CryptoContext::new().unwrap();
    let secrets = ctx.session_secrets().unwrap();
    let (a, mut b) = encoded_pair(1024);
    let mut session = SymmetricChannel::new(a, &secrets, Role::Initiator);

    session.close().await.unwrap();
    session.close().await.unwrap();

    assert!(b.receive().await.unwrap_err().is_disconnect());
    assert!(matches!(
        session.send(b"late").await,
        Err(ProtocolError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_session_rejects_replayed_ciphertext() {
    let ctx = CryptoContext::new().unwrap();
    let secrets = ctx.session_secrets().unwrap();
    let (a, mut b) = encoded_pair(4096);
    let mut sender = SymmetricChannel::new(a, &secrets, Role::Initiator);

    sender.send(b"!list").await.unwrap();
    let captured = b.receive().await.unwrap();

    // replay the captured ciphertext twice into a fresh responder
    let (x, y) = encoded_pair(4096);
    let mut injector = x;
    let mut responder = SymmetricChannel::new(y, &secrets, Role::Responder);
    injector.send(&captured).await.unwrap();
    injector.send(&captured).await.unwrap();

    assert_eq!(responder.receive().await.unwrap(), b"!list");
    let err = responder.receive().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decoding);
}

// ============================================================================
// INTEGRITY STAGE AND PEER MESSAGES
// ============================================================================

#[tokio::test]
async fn test_integrity_line_with_only_a_tag() {
    let (a, b) = tokio::io::duplex(1024);
    let mut raw = LineChannel::new(a, 1024);
    let key = IntegrityKey::from_bytes(b"0123456789abcdef").unwrap();
    let mut tagged = IntegrityChannel::new(LineChannel::new(b, 1024), key);

    raw.send(b"AAAA").await.unwrap();
    let verified = tagged.receive_verified().await.unwrap();
    assert!(!verified.is_authentic());
    assert_eq!(verified.payload(), b"AAAA");
}

#[test]
fn test_short_integrity_key_is_rejected() {
    let err = IntegrityKey::from_bytes(b"short").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_tamper_notice_keeps_message_text() {
    assert_eq!(private::tampered("!msg bob: hello'"), "!tampered bob: hello'");
    let report = DeliveryReport {
        peer: "bob".into(),
        reply: "!tampered alice: hellp".into(),
        forward_tampered: true,
        reply_tampered: false,
    };
    assert_eq!(report.describe(), "The message sent to bob has been tampered!");
}

// ============================================================================
// HANDSHAKE MESSAGES, KEY STORE, DISPATCHER
// ============================================================================

#[test]
fn test_ok_with_short_key_is_rejected() {
    let text = "!ok AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA= \
                AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA= AAAA AAAAAAAAAAAAAAAAAAAAAA==";
    assert!(HandshakeMessage::parse_ok(text).is_err());
}

#[test]
fn test_key_store_rejects_path_like_principals() {
    let ctx = CryptoContext::new().unwrap();
    let store = MemoryKeyStore::new();
    let key = PrivateKey::generate(&ctx).unwrap().public_key();

    assert!(store.insert("../server", key).is_err());
    assert!(store.insert("a/b", key).is_err());
    assert!(store.insert("", key).is_err());

    let err = store.public_key("nobody").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Handshake);
}

#[test]
fn test_dispatcher_is_shared_between_clones() {
    let dispatcher = Dispatcher::new();
    let clone = dispatcher.clone();
    clone
        .register("!ping", |_, _| Ok("pong".to_string()))
        .unwrap();

    assert_eq!(dispatcher.dispatch("alice", "!ping").unwrap(), "pong");
    assert_eq!(dispatcher.dispatch("alice", "ping").unwrap(), UNKNOWN_REQUEST);
    assert_eq!(dispatcher.dispatch("alice", "   ").unwrap(), UNKNOWN_REQUEST);
}

#[tokio::test]
async fn test_text_helpers_reject_invalid_utf8() {
    let (mut a, mut b) = encoded_pair(1024);
    a.send(&[0xff, 0xfe, 0x00]).await.unwrap();
    let err = b.receive_text().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decoding);
}
