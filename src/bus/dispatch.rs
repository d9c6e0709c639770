//! Topic dispatch tables
//!
//! Every endpoint owner builds one table when it binds, mapping each topic it
//! accepts to a plain handler function. Dispatching an inbound envelope is a
//! single map lookup followed by the handler call.

use super::{Envelope, Topic};
use crate::error::{PoolError, PoolResult};
use std::collections::HashMap;

/// Handler invoked for one inbound envelope
pub type Handler<S> = fn(&mut S, &Envelope) -> PoolResult<()>;

/// Topic → handler mapping for an endpoint owning state `S`
pub struct DispatchTable<S> {
    handlers: HashMap<Topic, Handler<S>>,
}

impl<S> DispatchTable<S> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Bind a handler to a topic, replacing any previous binding
    pub fn on(mut self, topic: Topic, handler: Handler<S>) -> Self {
        self.handlers.insert(topic, handler);
        self
    }

    /// Whether a handler is bound for `topic`
    pub fn handles(&self, topic: Topic) -> bool {
        self.handlers.contains_key(&topic)
    }

    /// Run the handler bound to the envelope's topic
    ///
    /// An envelope whose topic has no handler is malformed from this endpoint's
    /// point of view (e.g. a `start-task` arriving at the coordinator).
    pub fn dispatch(&self, state: &mut S, envelope: &Envelope) -> PoolResult<()> {
        match self.handlers.get(&envelope.topic) {
            Some(handler) => handler(state, envelope),
            None => Err(PoolError::malformed(
                envelope.topic,
                "topic is not accepted by this endpoint",
            )),
        }
    }
}

impl<S> Default for DispatchTable<S> {
    fn default() -> Self {
        Self::new()
    }
}
