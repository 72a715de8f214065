//! Inbound request handlers.
//!
//! Every registered handler sees every inbound request. The first handler
//! to produce `Some(response)` answers it; later results are discarded.
//! Among handlers that are ready at the same time, registration order wins.

use std::fmt;
use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::task::Poll;

use serde_json::Value;

use crate::multiplexer::DestinationId;

/// Boxed future returned by handlers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Where an inbound request came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    destination: DestinationId,
    request_id: String,
}

impl RequestContext {
    pub fn new(destination: DestinationId, request_id: impl Into<String>) -> Self {
        Self {
            destination,
            request_id: request_id.into(),
        }
    }

    pub fn destination(&self) -> &DestinationId {
        &self.destination
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

/// Produces the response to an inbound request, or `None` to decline.
///
/// Implemented for any `Fn(Value, RequestContext) -> impl Future<Output =
/// Option<Value>>`.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, message: Value, ctx: RequestContext) -> BoxFuture<Option<Value>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Value, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Value>> + Send + 'static,
{
    fn call(&self, message: Value, ctx: RequestContext) -> BoxFuture<Option<Value>> {
        Box::pin(self(message, ctx))
    }
}

/// Ordered set of handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: impl Handler) {
        self.handlers.push(Box::new(handler));
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run every handler and return the first response produced.
    ///
    /// Returns `None` when no handler is registered or all of them decline.
    pub async fn dispatch(&self, message: Value, ctx: RequestContext) -> Option<Value> {
        let mut running: Vec<Option<BoxFuture<Option<Value>>>> = self
            .handlers
            .iter()
            .map(|handler| Some(handler.call(message.clone(), ctx.clone())))
            .collect();

        poll_fn(|cx| {
            let mut pending = false;
            for slot in running.iter_mut() {
                let Some(fut) = slot else { continue };
                match fut.as_mut().poll(cx) {
                    Poll::Ready(Some(response)) => return Poll::Ready(Some(response)),
                    Poll::Ready(None) => *slot = None,
                    Poll::Pending => pending = true,
                }
            }
            if pending {
                Poll::Pending
            } else {
                Poll::Ready(None)
            }
        })
        .await
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
