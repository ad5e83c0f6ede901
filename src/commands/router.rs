//! Command Router
//!
//! Maps a lower-cased command name to its handler and dispatches requests.
//! The router owns the handle to the store, so handlers never reach for
//! global state.

use super::handler::{internal_error, Handler, COMMANDS};
use crate::protocol::Message;
use crate::storage::Store;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// Dispatches requests to command handlers.
#[derive(Clone)]
pub struct Router {
    store: Arc<Store>,
    routes: HashMap<&'static str, Handler>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.routes.keys().copied().collect();
        names.sort_unstable();
        f.debug_struct("Router")
            .field("store", &self.store)
            .field("routes", &names)
            .finish()
    }
}

impl Router {
    /// Creates a router with every built-in command registered.
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            routes: COMMANDS.iter().copied().collect(),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Registers `handler` under `name` (matched case-insensitively).
    pub fn route(mut self, name: &'static str, handler: Handler) -> Self {
        debug_assert_eq!(name, name.to_ascii_lowercase(), "route names are lower-case");
        self.routes.insert(name, handler);
        self
    }

    /// Executes one request and returns the reply.
    ///
    /// The request must be a non-empty array of UTF-8 bulk strings. Anything
    /// that goes wrong, including a panicking handler, becomes an error reply.
    pub fn dispatch(&self, request: Message) -> Message {
        match request_strings(request) {
            Ok(commands) => self.dispatch_commands(&commands),
            Err(reply) => reply,
        }
    }

    /// Executes an already-decoded request.
    pub fn dispatch_commands(&self, commands: &[String]) -> Message {
        let Some(name) = commands.first() else {
            return Message::error("ERR empty command");
        };

        let Some(handler) = self.routes.get(name.to_ascii_lowercase().as_str()) else {
            debug!(command = %name, "Unknown command");
            return Message::error(format!("ERR unknown command '{name}'"));
        };

        let store = &*self.store;
        match panic::catch_unwind(AssertUnwindSafe(|| handler(store, commands))) {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                error!(command = %name, "Handler registered for command did not accept it");
                internal_error()
            }
            Err(_) => {
                error!(command = %name, "Handler panicked");
                internal_error()
            }
        }
    }
}

/// Extracts the command and arguments from a request array.
fn request_strings(request: Message) -> Result<Vec<String>, Message> {
    let Message::Array(parts) = request else {
        return Err(Message::error("ERR invalid command format"));
    };

    parts
        .into_iter()
        .map(|part| match part {
            Message::BulkString(data) => String::from_utf8(data.to_vec())
                .map_err(|_| Message::error("ERR invalid UTF-8 in command")),
            _ => Err(Message::error("ERR invalid command format")),
        })
        .collect()
}
