use crate::error::{constants, ProtocolError, Result};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Reply sent for a command with no registered handler.
pub const UNKNOWN_REQUEST: &str = "Error: Unknown request.";

type HandlerFn = dyn Fn(&str, &str) -> Result<String> + Send + Sync + 'static;

/// Routes authenticated application lines by their first token.
///
/// Handlers receive the caller's bound identity and the full line and return the
/// reply line. Cloning shares the handler table.
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<Cow<'static, str>, Box<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register<F>(&self, command: impl Into<Cow<'static, str>>, handler: F) -> Result<()>
    where
        F: Fn(&str, &str) -> Result<String> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?;

        handlers.insert(command.into(), Box::new(handler));
        Ok(())
    }

    pub fn contains(&self, command: &str) -> bool {
        self.handlers
            .read()
            .map(|handlers| handlers.contains_key(command))
            .unwrap_or(false)
    }

    /// Reply for `line` sent by `identity`. Unknown commands answer
    /// [`UNKNOWN_REQUEST`]; handler errors propagate.
    pub fn dispatch(&self, identity: &str, line: &str) -> Result<String> {
        let command = command_of(line);

        let handlers = self
            .handlers
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?;

        match handlers.get(command) {
            Some(handler) => handler(identity, line),
            None => Ok(UNKNOWN_REQUEST.to_string()),
        }
    }
}

#[inline]
fn command_of(line: &str) -> &str {
    line.trim_start().split(' ').next().unwrap_or_default()
}
