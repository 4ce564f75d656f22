//! # Session Table
//!
//! Server-wide map from bound identity to the connection that owns it.
//!
//! Every connection task reads and writes this table, so all access goes
//! through one lock. `bind` checks and inserts under that lock, which means
//! two connections racing to log in the same identity cannot both succeed.
//!
//! ## Usage
//! ```
//! use secure_chat_protocol::service::SessionTable;
//!
//! let table = SessionTable::new();
//! table.bind("alice", 1).unwrap();
//! assert!(table.bind("alice", 2).is_err());
//! assert!(!table.unbind("alice", 2));
//! assert!(table.unbind("alice", 1));
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use tracing::{debug, trace};

use crate::error::{constants, ProtocolError, Result};

/// Server-assigned id of an accepted connection.
pub type ConnectionId = u64;

#[derive(Clone, Debug)]
struct SessionEntry {
    connection: ConnectionId,
    established_at: SystemTime,
}

#[derive(Clone, Default)]
pub struct SessionTable {
    inner: Arc<Mutex<SessionTableInner>>,
}

#[derive(Default)]
struct SessionTableInner {
    sessions: HashMap<String, SessionEntry>,
    total_binds: u64,
    rejected_binds: u64,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionTableInner>> {
        self.inner
            .lock()
            .map_err(|_| ProtocolError::SessionError(constants::ERR_LOCK_POISONED.into()))
    }

    /// Bind `identity` to `connection`. Fails with a session error if the
    /// identity is already bound, to this or any other connection.
    pub fn bind(&self, identity: &str, connection: ConnectionId) -> Result<()> {
        let mut inner = self.lock()?;

        if inner.sessions.contains_key(identity) {
            inner.rejected_binds += 1;
            debug!(identity = %identity, connection, "Identity already bound");
            return Err(ProtocolError::SessionError(
                constants::ERR_ALREADY_LOGGED_IN.into(),
            ));
        }

        inner.sessions.insert(
            identity.to_string(),
            SessionEntry {
                connection,
                established_at: SystemTime::now(),
            },
        );
        inner.total_binds += 1;

        trace!(session_count = inner.sessions.len(), "Identity bound");
        Ok(())
    }

    /// Release `identity` if `connection` owns it. Returns whether an entry was
    /// removed.
    pub fn unbind(&self, identity: &str, connection: ConnectionId) -> bool {
        let Ok(mut inner) = self.lock() else {
            return false;
        };
        match inner.sessions.get(identity) {
            Some(entry) if entry.connection == connection => {
                inner.sessions.remove(identity);
                debug!(identity = %identity, connection, "Identity unbound");
                true
            }
            _ => false,
        }
    }

    pub fn is_online(&self, identity: &str) -> bool {
        self.lock()
            .map(|inner| inner.sessions.contains_key(identity))
            .unwrap_or(false)
    }

    pub fn connection_of(&self, identity: &str) -> Option<ConnectionId> {
        self.lock()
            .ok()?
            .sessions
            .get(identity)
            .map(|entry| entry.connection)
    }

    /// How long `identity` has been bound.
    pub fn session_age(&self, identity: &str) -> Option<Duration> {
        let inner = self.lock().ok()?;
        let entry = inner.sessions.get(identity)?;
        entry.established_at.elapsed().ok()
    }

    /// Bound identities in sorted order.
    pub fn online(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .map(|inner| inner.sessions.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.sessions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut inner) = self.lock() {
            let count = inner.sessions.len();
            inner.sessions.clear();
            debug!(cleared_count = count, "Session table cleared");
        }
    }

    pub fn stats(&self) -> SessionTableStats {
        self.lock()
            .map(|inner| SessionTableStats {
                online: inner.sessions.len(),
                total_binds: inner.total_binds,
                rejected_binds: inner.rejected_binds,
            })
            .unwrap_or_default()
    }
}

/// Statistics about the session table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionTableStats {
    /// Identities currently bound
    pub online: usize,
    /// Successful binds since startup
    pub total_binds: u64,
    /// Binds refused because the identity was taken
    pub rejected_binds: u64,
}
