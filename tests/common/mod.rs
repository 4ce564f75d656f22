//! Shared fixtures for integration tests: a chat server on an ephemeral port
//! and a line-rewriting TCP proxy.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use secure_chat_protocol::config::{ClientConfig, ServerConfig};
use secure_chat_protocol::crypto::{CryptoContext, MemoryKeyStore, PrivateKey, PublicKey};
use secure_chat_protocol::error::Result;
use secure_chat_protocol::service::{ChatServer, SecureClient};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub struct TestServer {
    pub ctx: CryptoContext,
    pub server: Arc<ChatServer>,
    pub addr: SocketAddr,
    pub server_key: PublicKey,
    keys: HashMap<String, PrivateKey>,
    handle: JoinHandle<Result<()>>,
}

impl TestServer {
    pub async fn start(identities: &[&str]) -> Self {
        Self::start_with(identities, ServerConfig::default()).await
    }

    /// Server that knows a key pair for each of `identities` and answers
    /// `!whoami` and `!list`.
    pub async fn start_with(identities: &[&str], config: ServerConfig) -> Self {
        let ctx = CryptoContext::new().unwrap();
        let server_private = PrivateKey::generate(&ctx).unwrap();
        let server_key = server_private.public_key();

        let store = MemoryKeyStore::new();
        let mut keys = HashMap::new();
        for identity in identities {
            let key = PrivateKey::generate(&ctx).unwrap();
            store.insert(identity, key.public_key()).unwrap();
            keys.insert(identity.to_string(), key);
        }

        let server = ChatServer::new(config, ctx.clone(), server_private, Arc::new(store));
        server
            .dispatcher()
            .register("!whoami", |identity, _| Ok(identity.to_string()))
            .unwrap();
        let sessions = server.sessions().clone();
        server
            .dispatcher()
            .register("!list", move |_, _| {
                Ok(format!("Online users: {}", sessions.online().join(", ")))
            })
            .unwrap();

        let server = Arc::new(server);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(Arc::clone(&server).serve(listener));

        Self {
            ctx,
            server,
            addr,
            server_key,
            keys,
            handle,
        }
    }

    /// Private key registered for `identity`, or a fresh unregistered one.
    pub fn key(&self, identity: &str) -> PrivateKey {
        self.keys
            .get(identity)
            .cloned()
            .unwrap_or_else(|| PrivateKey::generate(&self.ctx).unwrap())
    }

    pub fn client_config(&self, addr: SocketAddr, identity: &str) -> ClientConfig {
        ClientConfig {
            server_address: addr.to_string(),
            identity: identity.to_string(),
            response_timeout: Duration::from_secs(5),
            ..ClientConfig::default()
        }
    }

    pub async fn connect(&self, identity: &str) -> Result<SecureClient> {
        self.connect_via(self.addr, identity).await
    }

    pub async fn connect_via(&self, addr: SocketAddr, identity: &str) -> Result<SecureClient> {
        SecureClient::connect(
            &self.client_config(addr, identity),
            self.ctx.clone(),
            self.key(identity),
            self.server_key,
        )
        .await
    }

    pub async fn stop(self) -> Result<()> {
        self.server.shutdown();
        self.handle.await.unwrap()
    }
}

/// Poll `condition` for up to two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Rewrites line number `index` of one direction.
pub type Rewrite = Arc<dyn Fn(usize, String) -> String + Send + Sync>;

pub fn passthrough() -> Rewrite {
    Arc::new(|_, line| line)
}

/// Rewrite only line `target` of a direction.
pub fn rewrite_line(target: usize, f: fn(String) -> String) -> Rewrite {
    Arc::new(move |index, line| if index == target { f(line) } else { line })
}

/// Line-level man-in-the-middle that records every line it forwards.
pub struct Proxy {
    pub addr: SocketAddr,
    pub wire: Arc<Mutex<Vec<String>>>,
}

impl Proxy {
    pub async fn spawn(upstream: SocketAddr, forward: Rewrite, backward: Rewrite) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let wire = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&wire);
        tokio::spawn(async move {
            while let Ok((client, _)) = listener.accept().await {
                let Ok(server) = TcpStream::connect(upstream).await else {
                    continue;
                };
                let (client_read, client_write) = client.into_split();
                let (server_read, server_write) = server.into_split();
                tokio::spawn(pump(client_read, server_write, forward.clone(), log.clone()));
                tokio::spawn(pump(server_read, client_write, backward.clone(), log.clone()));
            }
        });

        Self { addr, wire }
    }

    pub fn captured(&self) -> Vec<String> {
        self.wire.lock().unwrap().clone()
    }
}

async fn pump(
    from: OwnedReadHalf,
    mut to: OwnedWriteHalf,
    rewrite: Rewrite,
    log: Arc<Mutex<Vec<String>>>,
) {
    let mut lines = BufReader::new(from).lines();
    let mut index = 0;
    while let Ok(Some(line)) = lines.next_line().await {
        log.lock().unwrap().push(line.clone());
        let line = rewrite(index, line);
        index += 1;
        if to.write_all(format!("{line}\n").as_bytes()).await.is_err() {
            break;
        }
    }
    let _ = to.shutdown().await;
}

/// Flip one character of a base64 line without leaving the alphabet.
pub fn corrupt_base64(line: String) -> String {
    let mut chars: Vec<char> = line.chars().collect();
    let i = chars.len() / 2;
    chars[i] = if chars[i] == 'A' { 'B' } else { 'A' };
    chars.into_iter().collect()
}
