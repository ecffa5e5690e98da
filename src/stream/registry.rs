//! Event-type keyed handler registry and the single dispatch shim.
//!
//! Handlers are tagged sync or async when they are registered. Sync handlers
//! run to completion on the caller's task; async handlers are spawned on the
//! current tokio runtime and run concurrently with later dispatches. Handler
//! errors (and panics of sync handlers) are logged here and never escape.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::stream::proto::Event;

/// Error type returned by user handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

type SyncFn = dyn Fn(Event) -> HandlerResult + Send + Sync;
type AsyncFn = dyn Fn(Event) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// Calling convention declared at registration time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandlerKind {
    Sync,
    Async,
}

/// An ingress handler.
#[derive(Clone)]
pub enum Handler {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

impl Handler {
    /// Wraps a handler that runs inline on the receive loop.
    pub fn sync<F>(handler: F) -> Self
    where
        F: Fn(Event) -> HandlerResult + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(handler))
    }

    /// Wraps a handler whose future is spawned for each event.
    pub fn asynchronous<F, Fut>(handler: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let boxed = move |event: Event| -> BoxFuture<'static, HandlerResult> {
            Box::pin(handler(event))
        };
        Self::Async(Arc::new(boxed))
    }

    pub fn kind(&self) -> HandlerKind {
        match self {
            Self::Sync(_) => HandlerKind::Sync,
            Self::Async(_) => HandlerKind::Async,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.kind()).finish()
    }
}

/// Conversion trait for "one or many" event type arguments.
pub trait IntoEventTypes {
    fn into_event_types(self) -> Vec<String>;
}

impl IntoEventTypes for &str {
    fn into_event_types(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoEventTypes for String {
    fn into_event_types(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoEventTypes for &String {
    fn into_event_types(self) -> Vec<String> {
        vec![self.clone()]
    }
}

impl IntoEventTypes for Vec<String> {
    fn into_event_types(self) -> Vec<String> {
        self
    }
}

impl IntoEventTypes for Vec<&str> {
    fn into_event_types(self) -> Vec<String> {
        self.into_iter().map(str::to_string).collect()
    }
}

impl IntoEventTypes for &[&str] {
    fn into_event_types(self) -> Vec<String> {
        self.iter().map(|event_type| event_type.to_string()).collect()
    }
}

impl<const N: usize> IntoEventTypes for [&str; N] {
    fn into_event_types(self) -> Vec<String> {
        self.iter().map(|event_type| event_type.to_string()).collect()
    }
}

/// Result of dispatching one event.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A sync handler ran and returned `Ok`.
    Completed,
    /// A sync handler returned an error or panicked; it was logged.
    Failed,
    /// An async handler was spawned.
    Scheduled(JoinHandle<()>),
    /// No handler is registered for the event type.
    Unhandled,
}

/// Mapping from event type to handler. Any string is accepted as a type.
#[derive(Clone, Debug, Default)]
pub struct EventRegistry {
    handlers: HashMap<String, Handler>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under each of `event_types`; the last registration
    /// for a type wins.
    pub fn register<T>(&mut self, event_types: T, handler: Handler)
    where
        T: IntoEventTypes,
    {
        for event_type in event_types.into_event_types() {
            debug!(event = "register_ingress", %event_type, kind = ?handler.kind());
            if self.handlers.insert(event_type.clone(), handler.clone()).is_some() {
                debug!(event = "ingress_replaced", %event_type);
            }
        }
    }

    pub fn handler(&self, event_type: &str) -> Option<&Handler> {
        self.handlers.get(event_type)
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Routes `event` to the handler registered for its exact type.
    ///
    /// Async handlers are spawned with `tokio::spawn` and must therefore be
    /// dispatched from within a tokio runtime.
    pub fn dispatch(&self, event: Event) -> DispatchOutcome {
        let Some(handler) = self.handlers.get(&event.event_type) else {
            warn!(
                event = "ingress_unhandled",
                event_type = %event.event_type,
                "no handler registered for event type"
            );
            return DispatchOutcome::Unhandled;
        };

        let event_type = event.event_type.clone();
        debug!(event = "ingress_dispatch", %event_type, kind = ?handler.kind());

        match handler {
            Handler::Sync(handler) => {
                match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                    Ok(Ok(())) => DispatchOutcome::Completed,
                    Ok(Err(err)) => {
                        error!(event = "ingress_handler_failed", %event_type, error = %err);
                        DispatchOutcome::Failed
                    }
                    Err(_) => {
                        error!(event = "ingress_handler_panicked", %event_type);
                        DispatchOutcome::Failed
                    }
                }
            }
            Handler::Async(handler) => {
                let future = handler(event);
                DispatchOutcome::Scheduled(tokio::spawn(async move {
                    if let Err(err) = future.await {
                        error!(event = "ingress_handler_failed", %event_type, error = %err);
                    }
                }))
            }
        }
    }
}
