//! Async timeout helpers and the crate's default durations.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use crate::error::{ProtocolError, Result};

/// Default timeout for connecting and for request/reply round trips
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on each receive during the handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a server waits for open connections to drain on shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `future` with a deadline, mapping expiry to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
