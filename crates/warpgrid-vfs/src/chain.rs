//! Ordered, immutable handler chain.
//!
//! Constructed via [`HandlerChainBuilder`] and not modifiable afterwards, so
//! concurrent dispatches can walk it without locking. Order is exactly the
//! order handlers were appended; no scheme-based sorting happens here.

use std::fmt;
use std::sync::Arc;

use crate::handler::UriHandler;

#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Arc<[Arc<dyn UriHandler>]>,
}

/// Append-only builder for a [`HandlerChain`].
#[derive(Default)]
pub struct HandlerChainBuilder {
    handlers: Vec<Arc<dyn UriHandler>>,
}

impl HandlerChainBuilder {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Append a handler at the end of the chain.
    pub fn with_handler(mut self, handler: impl UriHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Append an already shared handler.
    pub fn with_shared(mut self, handler: Arc<dyn UriHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn build(self) -> HandlerChain {
        HandlerChain {
            handlers: self.handlers.into(),
        }
    }
}

impl HandlerChain {
    pub fn builder() -> HandlerChainBuilder {
        HandlerChainBuilder::new()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn UriHandler>> {
        self.handlers.iter()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handler names in chain order.
    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChain")
            .field("handlers", &self.names())
            .finish()
    }
}
