use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Error;
use crate::protocol::Event;

/// Callback invoked for a matching event.
///
/// Runs on the websocket read loop; a handler that blocks stalls the stream,
/// so long work belongs on a spawned task.
pub type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

struct Registration {
    uri: String,
    event_type: String,
    handler: Handler,
}

/// Ordered registry of `(uri, event type)` handlers.
///
/// Clones share the same registry, so registrations made through any clone
/// survive reconnects and are visible to the running session.
#[derive(Clone, Default)]
pub struct EventRouter {
    registrations: Arc<RwLock<Vec<Registration>>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure for an exact `(uri, event_type)` pair.
    pub fn register<F>(&self, uri: impl Into<String>, event_type: impl Into<String>, handler: F) -> Handler
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_handler(uri, event_type, Arc::new(handler))
    }

    /// Register an existing handler. Duplicates are kept; each registration
    /// fires once per matching event.
    pub fn register_handler(
        &self,
        uri: impl Into<String>,
        event_type: impl Into<String>,
        handler: Handler,
    ) -> Handler {
        self.registrations.write().push(Registration {
            uri: uri.into(),
            event_type: event_type.into(),
            handler: handler.clone(),
        });
        handler
    }

    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.read().is_empty()
    }

    /// Fails with [`Error::NoHandlersRegistered`] when nothing is registered.
    pub fn require_registered(&self) -> Result<(), Error> {
        if self.is_empty() {
            return Err(Error::NoHandlersRegistered);
        }
        Ok(())
    }

    /// Invoke every handler registered for the event's uri and type, in
    /// registration order. Handler failures go to `on_error` and do not stop
    /// the remaining handlers. Returns the number of handlers invoked.
    pub fn dispatch(&self, event: &Event, mut on_error: impl FnMut(Error)) -> usize {
        // Snapshot so handlers may register more routes without deadlocking.
        let matched: Vec<Handler> = self
            .registrations
            .read()
            .iter()
            .filter(|r| r.uri == event.uri && r.event_type == event.event_type)
            .map(|r| r.handler.clone())
            .collect();

        for handler in &matched {
            if let Err(source) = handler(event) {
                on_error(Error::Handler {
                    uri: event.uri.clone(),
                    event_type: event.event_type.clone(),
                    source,
                });
            }
        }

        matched.len()
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registrations = self.registrations.read();
        f.debug_list()
            .entries(registrations.iter().map(|r| (&r.uri, &r.event_type)))
            .finish()
    }
}
