//! Message handler lists for the dispatch chain.
//!
//! Inbound messages are offered to stream handlers, then connection handlers,
//! then port handlers; the first handler returning `true` stops the chain.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::conn::Conn;
use crate::core::StreamId;
use crate::message::Message;

/// Callback receiving `(conn, stream, message)`; returns whether it handled it.
pub type Handler = Arc<dyn Fn(&Conn, StreamId, &dyn Message) -> bool + Send + Sync>;

/// Append-only list of handlers, read through snapshots.
#[derive(Default)]
pub(crate) struct HandlerList {
    handlers: RwLock<Vec<Handler>>,
}

impl HandlerList {
    pub fn push(&self, handler: Handler) {
        self.handlers.write().push(handler);
    }

    /// Copy of the current handlers; the lock is not held while they run.
    pub fn snapshot(&self) -> Vec<Handler> {
        self.handlers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Offer `msg` to each handler in registration order.
    pub fn offer(&self, conn: &Conn, stream: StreamId, msg: &dyn Message) -> bool {
        self.snapshot().iter().any(|h| h(conn, stream, msg))
    }
}

impl fmt::Debug for HandlerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerList")
            .field("len", &self.len())
            .finish()
    }
}
