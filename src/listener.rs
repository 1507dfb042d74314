use tokio::sync::mpsc;

use crate::error::Error;

/// Receives lifecycle notifications from a running [`crate::lifecycle::Lifecycle`].
///
/// Every method defaults to a no-op. Calls are made from the lifecycle task,
/// so implementations should return quickly.
pub trait LifecycleListener: Send + Sync {
    /// Credentials were discovered and the transport configured.
    fn on_open(&self) {}
    /// The API answered its readiness check.
    fn on_ready(&self) {}
    /// The event websocket is subscribed and streaming.
    fn on_login(&self) {}
    /// The launcher UI came back after the session ended.
    fn on_logout(&self) {}
    /// The whole client stack exited.
    fn on_client_close(&self) {}
    /// The peer closed the event websocket cleanly.
    fn on_websocket_close(&self) {}
    /// A new target process was discovered after a disconnect.
    fn on_reconnect(&self) {}
    fn on_error(&self, _error: &Error) {}
}

/// Listener that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl LifecycleListener for TracingListener {
    fn on_open(&self) {
        tracing::info!("client found, credentials loaded");
    }

    fn on_ready(&self) {
        tracing::info!("client api ready");
    }

    fn on_login(&self) {
        tracing::info!("logged in, streaming events");
    }

    fn on_logout(&self) {
        tracing::info!("logged out");
    }

    fn on_client_close(&self) {
        tracing::warn!("client closed");
    }

    fn on_websocket_close(&self) {
        tracing::info!("websocket closed");
    }

    fn on_reconnect(&self) {
        tracing::info!("reconnected to client");
    }

    fn on_error(&self, error: &Error) {
        tracing::error!(%error, "client error");
    }
}

/// Lifecycle notification as a value, for channel-based consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Open,
    Ready,
    Login,
    Logout,
    ClientClose,
    WebsocketClose,
    Reconnect,
    /// Rendered error message.
    Error(String),
}

/// Forward notifications into a channel. Send failures (receiver dropped) are ignored.
impl LifecycleListener for mpsc::UnboundedSender<LifecycleEvent> {
    fn on_open(&self) {
        let _ = self.send(LifecycleEvent::Open);
    }

    fn on_ready(&self) {
        let _ = self.send(LifecycleEvent::Ready);
    }

    fn on_login(&self) {
        let _ = self.send(LifecycleEvent::Login);
    }

    fn on_logout(&self) {
        let _ = self.send(LifecycleEvent::Logout);
    }

    fn on_client_close(&self) {
        let _ = self.send(LifecycleEvent::ClientClose);
    }

    fn on_websocket_close(&self) {
        let _ = self.send(LifecycleEvent::WebsocketClose);
    }

    fn on_reconnect(&self) {
        let _ = self.send(LifecycleEvent::Reconnect);
    }

    fn on_error(&self, error: &Error) {
        let _ = self.send(LifecycleEvent::Error(error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_listener_forwards_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.on_open();
        tx.on_ready();
        tx.on_error(&Error::NoHandlersRegistered);

        assert_eq!(rx.try_recv().unwrap(), LifecycleEvent::Open);
        assert_eq!(rx.try_recv().unwrap(), LifecycleEvent::Ready);
        assert_eq!(
            rx.try_recv().unwrap(),
            LifecycleEvent::Error("no event handlers registered".into())
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_listener_ignores_dropped_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        tx.on_client_close();
    }

    #[test]
    fn default_methods_are_noops() {
        struct Silent;
        impl LifecycleListener for Silent {}

        let listener = Silent;
        listener.on_open();
        listener.on_error(&Error::Cancelled);
    }
}
