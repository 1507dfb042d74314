use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

use crate::credentials::Credentials;
use crate::error::Error;
use crate::lifecycle::StopHandle;
use crate::listener::LifecycleListener;
use crate::protocol::{ControlFrame, Event, Frame};
use crate::router::EventRouter;
use crate::tls;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = Arc<Mutex<SplitSink<WsStream, Message>>>;

/// How a streaming session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The peer sent a normal-closure frame.
    PeerClosed,
    /// A stop was requested locally.
    Stopped,
    Failed(Error),
}

/// One live event websocket.
///
/// Writes go through a shared lock on the sink; the read loop owns the stream
/// and is its only reader.
pub struct WebsocketSession {
    sink: WsSink,
    stream: SplitStream<WsStream>,
    running: AtomicBool,
    close_grace: Duration,
}

impl WebsocketSession {
    /// Dial `wss://127.0.0.1:{port}` with Basic auth. No retry.
    pub async fn connect(credentials: &Credentials, close_grace: Duration) -> Result<Self, Error> {
        let address = credentials.websocket_address();
        let mut request = address.as_str().into_client_request()?;

        let authorization = HeaderValue::from_str(&credentials.authorization_header())
            .map_err(|e| tungstenite::Error::HttpFormat(e.into()))?;
        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let connector = Connector::Rustls(tls::loopback_client_config());
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, Some(connector)).await?;
        tracing::debug!(%address, "websocket connected");

        let (sink, stream) = ws_stream.split();
        Ok(Self {
            sink: Arc::new(Mutex::new(sink)),
            stream,
            running: AtomicBool::new(true),
            close_grace,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Send a control frame under the sink lock.
    pub async fn send_control(&self, frame: &ControlFrame) -> Result<(), Error> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame.encode().into())).await?;
        Ok(())
    }

    /// Subscribe to JSON API events and wait for the first reply.
    ///
    /// A reply that is already an event is dispatched rather than dropped.
    /// Any failure to read the reply aborts the session.
    pub async fn subscribe(&mut self, router: &EventRouter, listener: &dyn LifecycleListener) -> Result<(), Error> {
        self.send_control(&ControlFrame::subscribe_json_api()).await?;

        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Ok(Frame::Event { event, .. }) = Frame::decode(text.as_str()) {
                    dispatch(router, listener, &event);
                }
                Ok(())
            }
            Some(Ok(Message::Close(frame))) => Err(Error::SubscribeAck(describe_close(frame.as_ref()))),
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => Err(e.into()),
            None => Err(Error::SubscribeAck("connection ended".into())),
        }
    }

    /// Read frames until the peer closes, the connection fails, or `stop` fires.
    pub async fn run(
        mut self,
        router: &EventRouter,
        listener: &dyn LifecycleListener,
        stop: &StopHandle,
    ) -> SessionEnd {
        let end = loop {
            let msg = tokio::select! {
                _ = stop.cancelled() => break SessionEnd::Stopped,
                msg = self.stream.next() => msg,
            };

            match msg {
                Some(Ok(Message::Text(text))) => handle_text(text.as_str(), router, listener),
                Some(Ok(Message::Close(frame))) => {
                    // Flush the close reply queued by the protocol layer.
                    let _ = self.sink.lock().await.close().await;
                    break match frame {
                        Some(ref f) if f.code == CloseCode::Normal => SessionEnd::PeerClosed,
                        other => SessionEnd::Failed(Error::WebsocketClosed(describe_close(other.as_ref()))),
                    };
                }
                // Pings are answered by the protocol layer; binary frames are not used.
                Some(Ok(_)) => {}
                Some(Err(tungstenite::Error::ConnectionClosed)) => break SessionEnd::PeerClosed,
                Some(Err(e)) => break SessionEnd::Failed(e.into()),
                None => {
                    break SessionEnd::Failed(Error::WebsocketClosed(
                        "connection ended without a close frame".into(),
                    ))
                }
            }
        };

        match end {
            SessionEnd::Stopped => self.shutdown(stop.drains_on_close()).await,
            _ => {
                self.running.store(false, Ordering::Release);
            }
        }
        tracing::debug!(?end, "websocket session ended");
        end
    }

    /// Unsubscribe and send a normal-closure frame, then (if `drain`) read
    /// until the peer echoes the close or the grace period runs out.
    pub async fn shutdown(mut self, drain: bool) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        {
            let mut sink = self.sink.lock().await;
            let unsubscribe = ControlFrame::unsubscribe_json_api().encode();
            if let Err(e) = sink.send(Message::Text(unsubscribe.into())).await {
                tracing::debug!(error = %e, "failed to send unsubscribe");
            }
            let close = CloseFrame {
                code: CloseCode::Normal,
                reason: String::new().into(),
            };
            if let Err(e) = sink.send(Message::Close(Some(close))).await {
                tracing::debug!(error = %e, "failed to send close frame");
            }
        }

        if !drain {
            return;
        }

        let grace = self.close_grace;
        let drained = tokio::time::timeout(grace, async {
            while let Some(msg) = self.stream.next().await {
                match msg {
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::debug!(?grace, "peer did not echo close in time");
        }
    }
}

fn handle_text(text: &str, router: &EventRouter, listener: &dyn LifecycleListener) {
    match Frame::decode(text) {
        Ok(Frame::Event { event, .. }) => dispatch(router, listener, &event),
        Ok(other) => tracing::trace!(?other, "ignoring non-event frame"),
        // Empty or truncated messages show up around client restarts.
        Err(e) => tracing::debug!(error = %e, "skipping undecodable frame"),
    }
}

fn dispatch(router: &EventRouter, listener: &dyn LifecycleListener, event: &Event) {
    let handled = router.dispatch(event, |e| listener.on_error(&e));
    tracing::trace!(uri = %event.uri, event_type = %event.event_type, handled, "event");
}

fn describe_close(frame: Option<&CloseFrame>) -> String {
    match frame {
        Some(f) if f.reason.as_str().is_empty() => format!("code {}", u16::from(f.code)),
        Some(f) => format!("code {}: {}", u16::from(f.code), f.reason.as_str()),
        None => "no close code".to_string(),
    }
}
