//! Accept loop and lifecycle of a controller run
//!
//! ```text
//!  Controller::run
//!    ├─ Handler::start
//!    ├─ timer threads ──────────────┐
//!    ├─ accept loop                 ├─> HandlerGate (one handler body at a time)
//!    │    └─ switch-conn-N threads ─┘
//!    └─ on stop: close listener, join every thread, return
//! ```

mod config;
mod connection;
mod handle;
pub(crate) mod lifecycle;

pub use config::{ControllerConfig, FailurePolicy};
pub use handle::ControllerHandle;

use std::io::{self, ErrorKind};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::{Error, HandlerResult, Result};
use crate::handler::{Handler, HandlerGate};
use crate::registry::SwitchRegistry;
use crate::timer::{TimerCallback, TimerEntry};
use connection::ConnectionWorker;
use lifecycle::{FinishGuard, Lifecycle};

/// State shared by every thread of a controller run.
pub(crate) struct Runtime<H> {
    pub(crate) config: ControllerConfig,
    pub(crate) gate: HandlerGate<H>,
    pub(crate) ctl: ControllerHandle,
}

impl<H: Handler> Runtime<H> {
    pub(crate) fn new(handler: H, config: ControllerConfig) -> Self {
        let lifecycle = Lifecycle::new();
        let gate = HandlerGate::new(handler, lifecycle.clone(), config.handler_fault);
        let ctl = ControllerHandle::new(SwitchRegistry::new(), lifecycle);
        Self { config, gate, ctl }
    }
}

/// Accepts switch connections and dispatches their events to a [`Handler`].
///
/// Register timers, then call [`run`](Controller::run), which blocks until
/// the controller is stopped through a [`ControllerHandle`].
pub struct Controller<H: Handler> {
    runtime: Arc<Runtime<H>>,
    timers: Vec<TimerEntry<H>>,
}

impl<H: Handler> Controller<H> {
    pub fn new(handler: H, config: ControllerConfig) -> Self {
        Self {
            runtime: Arc::new(Runtime::new(handler, config)),
            timers: Vec::new(),
        }
    }

    /// Register a callback to run every `interval` while the controller runs.
    ///
    /// # Errors
    ///
    /// * If a timer with the same name is already registered
    /// * If `interval` is zero
    pub fn add_timer_event<F>(&mut self, name: &str, interval: Duration, callback: F) -> Result<()>
    where
        F: FnMut(&mut H, &ControllerHandle) -> HandlerResult + Send + 'static,
    {
        let entry = TimerEntry::periodic(name, interval, Box::new(callback) as TimerCallback<H>)?;
        self.add_timer(entry)
    }

    /// Register a callback to run once, `delay` after the controller starts.
    pub fn add_oneshot_timer_event<F>(
        &mut self,
        name: &str,
        delay: Duration,
        callback: F,
    ) -> Result<()>
    where
        F: FnMut(&mut H, &ControllerHandle) -> HandlerResult + Send + 'static,
    {
        let entry = TimerEntry::oneshot(name, delay, Box::new(callback) as TimerCallback<H>)?;
        self.add_timer(entry)
    }

    fn add_timer(&mut self, entry: TimerEntry<H>) -> Result<()> {
        if self.timers.iter().any(|t| t.name() == entry.name()) {
            return Err(Error::Config(format!(
                "timer `{}` is already registered",
                entry.name()
            )));
        }
        self.timers.push(entry);
        Ok(())
    }

    /// Handle for sending to switches and stopping the controller,
    /// usable from any thread
    pub fn handle(&self) -> ControllerHandle {
        self.runtime.ctl.clone()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.runtime.config
    }

    /// Access the application handler while no event is being handled
    pub fn with_handler<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        self.runtime.gate.with_handler(f)
    }

    /// Stop the controller. See [`ControllerHandle::stop`].
    pub fn stop(&self) -> bool {
        self.runtime.ctl.stop()
    }

    /// Run the controller, blocking until it is stopped.
    ///
    /// Calls [`Handler::start`] with `args`, starts every registered timer,
    /// and accepts switch connections until a stop is requested. Every
    /// connection and timer thread has exited by the time this returns.
    ///
    /// # Errors
    ///
    /// * If the controller has already been run
    /// * If the listening socket cannot be bound
    /// * If a failure under [`FailurePolicy::Shutdown`] stopped the controller
    pub fn run(&mut self, args: &[String]) -> Result<()> {
        let runtime = self.runtime.clone();
        let lifecycle = runtime.ctl.lifecycle().clone();
        lifecycle.mark_started()?;

        // Whatever happens below, mark the run finished so stop() callers return
        let _finish = FinishGuard {
            lifecycle: lifecycle.clone(),
        };

        info!("Starting controller `{}`", runtime.config.op_name);
        let started = runtime
            .gate
            .invoke("start", |h| h.start(&runtime.ctl, args));
        if started.is_break() {
            info!("Controller `{}` stopped before listening", runtime.config.op_name);
            return match lifecycle.take_fatal() {
                Some(err) => Err(err),
                None => Ok(()),
            };
        }

        let mut timer_threads = Vec::new();
        for entry in self.timers.drain(..) {
            let name = entry.name().to_owned();
            match entry.spawn(runtime.clone()) {
                Ok(thread) => timer_threads.push(thread),
                Err(e) => warn!("Unable to start timer `{name}`: {e}"),
            }
        }

        let result = self.accept_loop(&runtime);

        // Release the registry's writers; the tracked sockets were already shut down
        lifecycle.request_stop();
        runtime.ctl.switches().clear();
        for thread in timer_threads {
            if thread.join().is_err() {
                error!("A timer thread panicked");
            }
        }
        info!("Controller `{}` stopped", runtime.config.op_name);

        result?;
        match lifecycle.take_fatal() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Accept connections until a stop is requested, then join their threads.
    fn accept_loop(&self, runtime: &Arc<Runtime<H>>) -> Result<()> {
        let lifecycle = runtime.ctl.lifecycle();
        let listener = TcpListener::bind(runtime.config.listen_addr())?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        lifecycle.mark_listening(local_addr);
        info!("Listening for switches on {local_addr}");

        let poll = runtime.config.accept_poll();
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        while !lifecycle.is_stopping() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {peer}");
                    if let Err(e) = stream.set_nonblocking(false) {
                        warn!("Rejecting connection from {peer}: {e}");
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    let conn_id = match lifecycle.track(&stream) {
                        Ok(conn_id) => conn_id,
                        Err(e) => {
                            warn!("Rejecting connection from {peer}: {e}");
                            continue;
                        }
                    };
                    let worker = ConnectionWorker::new(conn_id, peer, stream, runtime.clone());
                    match worker.spawn() {
                        Ok(thread) => workers.push(thread),
                        Err(e) => {
                            warn!("Unable to start worker for connection from {peer}: {e}");
                            lifecycle.forget(conn_id);
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    workers.retain(|w| !w.is_finished());
                    thread::sleep(poll);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if listener_is_unusable(&listener, &e) => {
                    error!("Listener on {local_addr} is unusable: {e}");
                    lifecycle.fail(e.into());
                }
                Err(e) => {
                    // Out of descriptors, aborted handshakes and the like pass
                    warn!("Accept failed, retrying: {e}");
                    workers.retain(|w| !w.is_finished());
                    thread::sleep(poll);
                }
            }
        }

        // Stop accepting before waiting on the connections
        drop(listener);
        for worker in workers {
            if worker.join().is_err() {
                error!("A connection thread panicked");
            }
        }
        Ok(())
    }
}

/// Whether an accept error means the listening socket itself is gone.
fn listener_is_unusable(listener: &TcpListener, err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::InvalidInput | ErrorKind::Unsupported)
        || listener.local_addr().is_err()
}

impl<H: Handler> std::fmt::Debug for Controller<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.runtime.config)
            .field("timers", &self.timers)
            .finish()
    }
}
