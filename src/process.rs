//! Process census and presence polling.
//!
//! All waits poll the [`ProcessTable`] on a fixed interval. Enumeration
//! failures count as "not found" for that tick and are never surfaced.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// A running process as seen by one census.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    /// Command line, one element per argument.
    pub cmd: Vec<String>,
}

impl ProcessEntry {
    pub fn new(pid: u32, name: impl Into<String>, cmd: Vec<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            cmd,
        }
    }
}

/// Source of process snapshots.
pub trait ProcessTable: Send + Sync {
    fn snapshot(&self) -> std::io::Result<Vec<ProcessEntry>>;
}

/// Process table backed by the operating system.
pub struct SystemProcessTable {
    system: Mutex<System>,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn snapshot(&self) -> std::io::Result<Vec<ProcessEntry>> {
        let mut system = self.system.lock();
        let refresh = ProcessRefreshKind::nothing().with_cmd(UpdateKind::OnlyIfNotSet);
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh);

        Ok(system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessEntry {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                cmd: process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned())
                    .collect(),
            })
            .collect())
    }
}

/// Which side of [`ProcessWatcher::race_two`] resolved first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceOutcome {
    PrimaryPresent,
    SecondaryAbsent,
}

/// Presence queries over a [`ProcessTable`].
#[derive(Clone)]
pub struct ProcessWatcher {
    table: Arc<dyn ProcessTable>,
    interval: Duration,
}

impl ProcessWatcher {
    pub fn new(table: Arc<dyn ProcessTable>, interval: Duration) -> Self {
        Self { table, interval }
    }

    /// Watcher over the operating system's process list.
    pub fn system(interval: Duration) -> Self {
        Self::new(Arc::new(SystemProcessTable::new()), interval)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One census tick.
    pub fn find(&self, name: &str) -> Option<ProcessEntry> {
        match self.table.snapshot() {
            Ok(processes) => processes.into_iter().find(|p| p.name == name),
            Err(e) => {
                tracing::debug!(process = %name, error = %e, "process enumeration failed");
                None
            }
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Poll until `name` exists. Only the cancellation token ends the wait early.
    pub async fn find_indefinitely(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ProcessEntry, Error> {
        loop {
            if let Some(process) = self.find(name) {
                tracing::debug!(process = %name, pid = process.pid, "process found");
                return Ok(process);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Poll until `name` exists or `timeout` elapses.
    pub async fn find_with_timeout(&self, name: &str, timeout: Duration) -> Result<ProcessEntry, Error> {
        let never = CancellationToken::new();
        match tokio::time::timeout(timeout, self.find_indefinitely(name, &never)).await {
            Ok(result) => result,
            Err(_) => Err(Error::ProcessNotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Race "`primary` appears" against "`secondary` disappears".
    ///
    /// Two pollers run concurrently and share a single-slot outcome; the
    /// first to observe its condition wins, the other stops at its next
    /// check without writing. Returns [`Error::Cancelled`] if `cancel` fires
    /// first.
    pub async fn race_two(
        &self,
        primary: &str,
        secondary: &str,
        cancel: &CancellationToken,
    ) -> Result<RaceOutcome, Error> {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(OutcomeSlot {
            resolved: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
            done: CancellationToken::new(),
        });

        let primary_poller = tokio::spawn(poll_presence(
            self.clone(),
            primary.to_string(),
            true,
            RaceOutcome::PrimaryPresent,
            slot.clone(),
        ));
        let secondary_poller = tokio::spawn(poll_presence(
            self.clone(),
            secondary.to_string(),
            false,
            RaceOutcome::SecondaryAbsent,
            slot.clone(),
        ));

        let result = tokio::select! {
            outcome = rx => outcome.map_err(|_| Error::Cancelled),
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };

        slot.done.cancel();
        let _ = tokio::join!(primary_poller, secondary_poller);

        if let Ok(outcome) = &result {
            tracing::debug!(?outcome, %primary, %secondary, "process race resolved");
        }
        result
    }
}

struct OutcomeSlot {
    resolved: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<RaceOutcome>>>,
    done: CancellationToken,
}

impl OutcomeSlot {
    fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// First caller wins; later callers return false without writing.
    fn resolve(&self, outcome: RaceOutcome) -> bool {
        if self.resolved.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(outcome);
        }
        self.done.cancel();
        true
    }
}

async fn poll_presence(
    watcher: ProcessWatcher,
    name: String,
    want_present: bool,
    outcome: RaceOutcome,
    slot: Arc<OutcomeSlot>,
) {
    loop {
        if slot.is_resolved() {
            return;
        }
        if watcher.is_running(&name) == want_present {
            slot.resolve(outcome);
            return;
        }

        tokio::select! {
            _ = slot.done.cancelled() => return,
            _ = tokio::time::sleep(watcher.interval) => {}
        }
    }
}
