//! Run/stop signalling shared by the accept loop, connection threads,
//! timer threads, and controller handles.

use std::collections::BTreeMap;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, Sender};
use tracing::{error, info, warn};

use super::config::FailurePolicy;
use crate::error::{Error, Result};
use crate::registry::ConnectionId;

/// Predicates for the run-state condvar,
/// because condvars can generate spurious wake signals.
#[derive(Clone, Copy, Debug, Default)]
struct RunState {
    started: bool,
    listening: Option<SocketAddr>,
    finished: bool,
}

/// Shared stop signal and bookkeeping for one controller run.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    stopping: AtomicBool,

    /// Dropped on stop so every receiver observes a disconnect
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,

    state: Mutex<RunState>,
    cvar: Condvar,

    /// Clones of every accepted socket, so reads blocked on them can be interrupted
    connections: Mutex<BTreeMap<ConnectionId, TcpStream>>,
    next_conn_id: AtomicU64,

    /// First failure that stopped the run
    fatal: Mutex<Option<Error>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Lifecycle {
    pub(crate) fn new() -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = bounded(0);
        Arc::new(Self {
            stopping: AtomicBool::new(false),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            state: Mutex::new(RunState::default()),
            cvar: Condvar::new(),
            connections: Mutex::new(BTreeMap::new()),
            next_conn_id: AtomicU64::new(1),
            fatal: Mutex::new(None),
        })
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Receiver that disconnects when a stop is requested
    pub(crate) fn shutdown_receiver(&self) -> Receiver<()> {
        self.shutdown_rx.clone()
    }

    /// Begin stopping. Returns `true` only for the call that initiated the stop.
    pub(crate) fn request_stop(&self) -> bool {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!("Stopping controller");

        // Wake timer threads
        drop(lock(&self.shutdown_tx).take());

        // Interrupt blocking reads
        for (conn_id, stream) in lock(&self.connections).iter() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                warn!("Unable to shut down connection {conn_id}: {e}");
            }
        }

        // Wake anyone waiting for the listener
        self.cvar.notify_all();
        true
    }

    /// Record a failure that ends the run, then stop.
    pub(crate) fn fail(&self, err: Error) {
        {
            let mut fatal = lock(&self.fatal);
            if fatal.is_none() {
                *fatal = Some(err);
            }
        }
        self.request_stop();
    }

    pub(crate) fn take_fatal(&self) -> Option<Error> {
        lock(&self.fatal).take()
    }

    /// Apply a failure policy to `err`.
    ///
    /// Returns `Break` when the caller should stop what it is doing.
    pub(crate) fn escalate(&self, policy: FailurePolicy, err: Error) -> ControlFlow<()> {
        match policy {
            FailurePolicy::Abort => {
                error!("{err}; aborting controller process");
                std::process::exit(1);
            }
            FailurePolicy::Shutdown => {
                error!("{err}; shutting down controller");
                self.fail(err);
                ControlFlow::Break(())
            }
            FailurePolicy::Isolate => {
                warn!("{err}");
                ControlFlow::Continue(())
            }
        }
    }

    /// Mark the start of a run. Each lifecycle runs at most once.
    pub(crate) fn mark_started(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.started {
            return Err(Error::AlreadyRunning);
        }
        state.started = true;
        Ok(())
    }

    pub(crate) fn mark_listening(&self, addr: SocketAddr) {
        lock(&self.state).listening = Some(addr);
        self.cvar.notify_all();
    }

    /// Set finished predicate and signal condvar.
    pub(crate) fn mark_finished(&self) {
        let mut state = lock(&self.state);
        state.listening = None;
        state.finished = true;
        self.cvar.notify_all();
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.state).listening
    }

    /// Wait until the listener is bound, the run has finished, or the timeout passes.
    pub(crate) fn wait_listening(&self, timeout: Duration) -> Option<SocketAddr> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        while state.listening.is_none() && !state.finished {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            state = self
                .cvar
                .wait_timeout(state, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        state.listening
    }

    /// Wait for a started run to finish. Returns immediately if no run has started.
    pub(crate) fn wait_finished(&self) {
        let mut state = lock(&self.state);
        while state.started && !state.finished {
            state = self
                .cvar
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Track an accepted socket so a stop can interrupt reads on it.
    pub(crate) fn track(&self, stream: &TcpStream) -> std::io::Result<ConnectionId> {
        let clone = stream.try_clone()?;
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let mut connections = lock(&self.connections);
        if self.is_stopping() {
            let _ = clone.shutdown(Shutdown::Both);
        }
        connections.insert(conn_id, clone);
        Ok(conn_id)
    }

    /// Close a tracked socket and stop tracking it
    pub(crate) fn forget(&self, conn_id: ConnectionId) {
        if let Some(stream) = lock(&self.connections).remove(&conn_id) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Allocate a connection id without a socket, for connections over other streams
    #[cfg(test)]
    pub(crate) fn next_conn_id(&self) -> ConnectionId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Drop-guard to guarantee that the run is marked
/// finished if the accept loop exits for any reason.
pub(crate) struct FinishGuard {
    pub(crate) lifecycle: Arc<Lifecycle>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.lifecycle.mark_finished();
    }
}
