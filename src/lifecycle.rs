//! Session lifecycle: discover the client, wait for it to settle, stream
//! events, and work out what happened when the stream ends.
//!
//! ```text
//! Discovering ─► Authenticating ─► WaitingReady ─► WaitingLogin ─► Streaming
//!      ▲                                                              │
//!      └──── Reconnecting ◄──── Disconnected (◄─► Respawning) ◄───────┘
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::credentials::{CommandLineCredentials, CredentialSource, Credentials};
use crate::error::Error;
use crate::listener::{LifecycleListener, TracingListener};
use crate::process::{ProcessTable, ProcessWatcher, RaceOutcome};
use crate::router::EventRouter;
use crate::transport::Transport;
use crate::websocket::{SessionEnd, WebsocketSession};

/// Readiness check; answers once the client's API is up.
pub const READY_PATH: &str = "/riotclient/region-locale";
/// Login state of the current user.
pub const LOGIN_PATH: &str = "/lol-login/v1/session";

// ── Stop handle ──────────────────────────────────────────────────────

/// Cloneable stop switch for a running [`Lifecycle`].
#[derive(Clone)]
pub struct StopHandle {
    token: CancellationToken,
    drain: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            drain: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Wake every wait and close an active session gracefully.
    pub fn stop(&self) {
        self.drain.store(true, Ordering::Release);
        self.token.cancel();
    }

    /// Like [`stop`](Self::stop) but skip waiting for the peer's close echo.
    pub fn abort(&self) {
        self.drain.store(false, Ordering::Release);
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn drains_on_close(&self) -> bool {
        self.drain.load(Ordering::Acquire)
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

// ── Types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Discovering,
    Authenticating,
    WaitingReady,
    WaitingLogin,
    Streaming,
    Disconnected,
    Respawning,
    Reconnecting,
    Terminated,
}

/// Verdict on why a streaming session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// The client stack exited.
    Crashed,
    /// The user logged out and the client came back.
    Relaunched,
    /// A stop was requested while classifying.
    ClosedForGood,
}

/// Body of `GET /lol-login/v1/session`. Fields the client omits or nulls
/// stay `None`.
///
/// Only `connected` and `state` decide login. The rest decode leniently: a
/// value of an unexpected type becomes `None` instead of failing the body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginSession {
    #[serde(deserialize_with = "lenient")]
    pub account_id: Option<u64>,
    pub connected: Option<bool>,
    pub error: Option<serde_json::Value>,
    #[serde(deserialize_with = "lenient")]
    pub id_token: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub is_in_login_queue: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub is_new_player: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub puuid: Option<String>,
    pub state: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub summoner_id: Option<u64>,
    #[serde(deserialize_with = "lenient")]
    pub username: Option<String>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl LoginSession {
    pub fn is_logged_in(&self) -> bool {
        self.connected == Some(true)
            && self
                .state
                .as_deref()
                .is_some_and(|state| state.eq_ignore_ascii_case("succeeded"))
    }
}

// ── Lifecycle ────────────────────────────────────────────────────────

/// Drives one client connection from discovery through reconnects.
pub struct Lifecycle {
    config: ClientConfig,
    watcher: ProcessWatcher,
    source: Arc<dyn CredentialSource>,
    listener: Arc<dyn LifecycleListener>,
    router: EventRouter,
    stop: StopHandle,
    phase: RwLock<Phase>,
    credentials: RwLock<Option<Arc<Credentials>>>,
    transport: RwLock<Option<Arc<Transport>>>,
}

impl Lifecycle {
    pub fn new(config: ClientConfig) -> Self {
        let watcher = ProcessWatcher::system(config.poll_interval());
        Self {
            config,
            watcher,
            source: Arc::new(CommandLineCredentials),
            listener: Arc::new(TracingListener),
            router: EventRouter::new(),
            stop: StopHandle::new(),
            phase: RwLock::new(Phase::Idle),
            credentials: RwLock::new(None),
            transport: RwLock::new(None),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_process_table(mut self, table: Arc<dyn ProcessTable>) -> Self {
        self.watcher = ProcessWatcher::new(table, self.config.poll_interval());
        self
    }

    pub fn with_credential_source(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.source = source;
        self
    }

    /// Use an existing router; its registrations are shared.
    pub fn with_router(mut self, router: EventRouter) -> Self {
        self.router = router;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn watcher(&self) -> &ProcessWatcher {
        &self.watcher
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.read()
    }

    /// Credentials of the most recently discovered client.
    pub fn credentials(&self) -> Option<Arc<Credentials>> {
        self.credentials.read().clone()
    }

    /// Transport for the current client, once authenticated.
    pub fn transport(&self) -> Option<Arc<Transport>> {
        self.transport.read().clone()
    }

    /// Run until stopped, until the first session ends with reconnects off,
    /// or until a fatal error.
    pub async fn run(&self) -> Result<(), Error> {
        let result = self.drive().await;
        self.set_phase(Phase::Terminated);
        match result {
            Err(Error::Cancelled) => {
                tracing::info!("lifecycle stopped");
                Ok(())
            }
            other => other,
        }
    }

    async fn drive(&self) -> Result<(), Error> {
        if let Err(e) = self.router.require_registered() {
            self.listener.on_error(&e);
            return Err(e);
        }

        let interval = self.config.poll_interval();
        let mut streamed = false;
        let mut credentials = self.discover().await?;

        loop {
            let transport = self.authenticate(credentials.clone())?;
            self.listener.on_open();

            self.set_phase(Phase::WaitingReady);
            wait_ready(&transport, interval, self.stop.token()).await?;
            self.listener.on_ready();

            self.set_phase(Phase::WaitingLogin);
            let login = wait_logged_in(&transport, interval, self.stop.token()).await?;
            tracing::info!(summoner_id = ?login.summoner_id, "login settled");

            self.set_phase(Phase::Streaming);
            match self.stream(&credentials).await {
                Ok(SessionEnd::Stopped) => return Ok(()),
                Ok(SessionEnd::PeerClosed) => {
                    streamed = true;
                    self.listener.on_websocket_close();
                }
                Ok(SessionEnd::Failed(e)) => {
                    streamed = true;
                    self.listener.on_error(&e);
                }
                Err(e) => {
                    self.listener.on_error(&e);
                    if !streamed {
                        return Err(e);
                    }
                }
            }

            if !self.config.reconnect {
                return Ok(());
            }

            self.set_phase(Phase::Disconnected);
            let respawn_path = credentials.respawn_path.clone();
            if self.await_relaunch(respawn_path.as_deref()).await? == Disconnect::ClosedForGood {
                return Ok(());
            }

            self.set_phase(Phase::Reconnecting);
            credentials = self.discover().await?;
            self.listener.on_reconnect();
        }
    }

    /// Wait for the target process and read its credentials. Credential
    /// failures are reported and retried on the next tick.
    async fn discover(&self) -> Result<Arc<Credentials>, Error> {
        self.set_phase(Phase::Discovering);
        let target = &self.config.processes.target;

        loop {
            let process = self.watcher.find_indefinitely(target, self.stop.token()).await?;
            match self.source.credentials(&process) {
                Ok(credentials) => {
                    let credentials = Arc::new(credentials);
                    tracing::info!(pid = process.pid, port = credentials.port, "client discovered");
                    *self.credentials.write() = Some(credentials.clone());
                    return Ok(credentials);
                }
                Err(e) => {
                    tracing::debug!(pid = process.pid, error = %e, "credentials unavailable");
                    self.listener.on_error(&e);
                }
            }
            pause(self.watcher.interval(), self.stop.token()).await?;
        }
    }

    fn authenticate(&self, credentials: Arc<Credentials>) -> Result<Arc<Transport>, Error> {
        self.set_phase(Phase::Authenticating);
        let transport = Arc::new(Transport::new(credentials, &self.config.http)?);
        *self.transport.write() = Some(transport.clone());
        Ok(transport)
    }

    async fn stream(&self, credentials: &Credentials) -> Result<SessionEnd, Error> {
        let mut session = WebsocketSession::connect(credentials, self.config.close_grace()).await?;

        let acked = tokio::select! {
            result = session.subscribe(&self.router, self.listener.as_ref()) => Some(result),
            _ = self.stop.cancelled() => None,
        };
        match acked {
            Some(result) => result?,
            None => {
                session.shutdown(self.stop.drains_on_close()).await;
                return Ok(SessionEnd::Stopped);
            }
        }

        self.listener.on_login();
        Ok(session.run(&self.router, self.listener.as_ref(), &self.stop).await)
    }

    /// One classification round after a session ends.
    ///
    /// Races "launcher UI present" against "services gone". A launcher means
    /// the user logged out; a second race then waits for the target to come
    /// back or the services to exit.
    pub async fn classify_disconnect(&self) -> Result<Disconnect, Error> {
        let names = &self.config.processes;
        let cancel = self.stop.token();

        let outcome = match self.watcher.race_two(&names.launcher, &names.services, cancel).await {
            Ok(outcome) => outcome,
            Err(Error::Cancelled) => return Ok(Disconnect::ClosedForGood),
            Err(e) => return Err(e),
        };
        if outcome == RaceOutcome::SecondaryAbsent {
            return Ok(Disconnect::Crashed);
        }

        self.listener.on_logout();
        match self.watcher.race_two(&names.target, &names.services, cancel).await {
            Ok(RaceOutcome::PrimaryPresent) => Ok(Disconnect::Relaunched),
            Ok(RaceOutcome::SecondaryAbsent) => Ok(Disconnect::Crashed),
            Err(Error::Cancelled) => Ok(Disconnect::ClosedForGood),
            Err(e) => Err(e),
        }
    }

    /// Classify until the client is back or a stop is requested.
    ///
    /// The first crash of a disconnect emits `on_client_close` and spawns
    /// `respawn_path` once; later crash verdicts only wait.
    pub async fn await_relaunch(&self, respawn_path: Option<&Path>) -> Result<Disconnect, Error> {
        let mut respawned = false;
        loop {
            match self.classify_disconnect().await? {
                Disconnect::Crashed => {
                    if !respawned {
                        respawned = true;
                        self.listener.on_client_close();
                        self.respawn_client(respawn_path);
                    }
                    if pause(self.watcher.interval(), self.stop.token()).await.is_err() {
                        return Ok(Disconnect::ClosedForGood);
                    }
                    self.set_phase(Phase::Disconnected);
                }
                verdict => {
                    tracing::info!(?verdict, "disconnect classified");
                    return Ok(verdict);
                }
            }
        }
    }

    fn respawn_client(&self, path: Option<&Path>) {
        self.set_phase(Phase::Respawning);
        let Some(path) = path else {
            tracing::warn!("client closed and no respawn command is known");
            return;
        };
        if let Err(e) = respawn(path) {
            tracing::warn!(error = %e, "respawn failed");
            self.listener.on_error(&e);
        }
    }

    fn set_phase(&self, phase: Phase) {
        let previous = std::mem::replace(&mut *self.phase.write(), phase);
        if previous != phase {
            tracing::debug!(from = ?previous, to = ?phase, "lifecycle phase");
        }
    }
}

// ── Waits ────────────────────────────────────────────────────────────

/// Poll [`READY_PATH`] until a request to it completes.
///
/// Any response counts, error statuses included. Only transport failures
/// are retried.
pub async fn wait_ready(transport: &Transport, interval: Duration, cancel: &CancellationToken) -> Result<(), Error> {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match transport.get(READY_PATH).await {
            Ok(_) => {
                tracing::debug!(attempts, "client api ready");
                return Ok(());
            }
            Err(Error::HttpStatus { status, .. }) => {
                tracing::debug!(attempts, status, "client api ready");
                return Ok(());
            }
            Err(e) => tracing::debug!(attempts, error = %e, "client api not ready"),
        }
        pause(interval, cancel).await?;
    }
}

/// Poll [`LOGIN_PATH`] until the session reports a completed login.
pub async fn wait_logged_in(
    transport: &Transport,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<LoginSession, Error> {
    loop {
        match transport.get_json::<LoginSession>(LOGIN_PATH).await {
            Ok(session) if session.is_logged_in() => return Ok(session),
            Ok(session) => tracing::trace!(state = ?session.state, "login not settled"),
            Err(e) => tracing::debug!(error = %e, "login state unavailable"),
        }
        pause(interval, cancel).await?;
    }
}

/// Start the client's relaunch executable and leave it running.
pub fn respawn(path: &Path) -> Result<(), Error> {
    let child = tokio::process::Command::new(path)
        .spawn()
        .map_err(|source| Error::RespawnFailed {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::info!(path = %path.display(), pid = ?child.id(), "respawned client");
    Ok(())
}

async fn pause(interval: Duration, cancel: &CancellationToken) -> Result<(), Error> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(interval) => Ok(()),
    }
}
