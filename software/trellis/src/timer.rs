//! Named periodic and one-shot callbacks that run under the handler lock.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::RecvTimeoutError;
use tracing::{debug, info};

use crate::controller::{ControllerHandle, Runtime};
use crate::error::{Error, HandlerResult, Result};
use crate::handler::Handler;

/// Callback invoked each time a timer fires
pub type TimerCallback<H> = Box<dyn FnMut(&mut H, &ControllerHandle) -> HandlerResult + Send>;

/// A timer registered with a controller before it runs.
pub struct TimerEntry<H> {
    name: String,
    interval: Duration,
    repeat: bool,
    callback: TimerCallback<H>,
}

impl<H: Handler> TimerEntry<H> {
    /// Fire every `interval` until the controller stops.
    ///
    /// # Errors
    ///
    /// * If `interval` is zero
    pub fn periodic(
        name: impl Into<String>,
        interval: Duration,
        callback: TimerCallback<H>,
    ) -> Result<Self> {
        Self::new(name.into(), interval, true, callback)
    }

    /// Fire once after `delay`, unless the controller stops first.
    pub fn oneshot(
        name: impl Into<String>,
        delay: Duration,
        callback: TimerCallback<H>,
    ) -> Result<Self> {
        Self::new(name.into(), delay, false, callback)
    }

    fn new(
        name: String,
        interval: Duration,
        repeat: bool,
        callback: TimerCallback<H>,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::Config(format!(
                "timer `{name}` must have a non-zero interval"
            )));
        }
        Ok(Self {
            name,
            interval,
            repeat,
            callback,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_repeating(&self) -> bool {
        self.repeat
    }

    /// Start this timer on its own thread.
    ///
    /// The thread sleeps on the controller's shutdown channel, so a stop
    /// wakes it immediately instead of after the next firing.
    pub(crate) fn spawn(mut self, runtime: Arc<Runtime<H>>) -> std::io::Result<JoinHandle<()>> {
        let shutdown = runtime.ctl.lifecycle().shutdown_receiver();
        thread::Builder::new()
            .name(format!("timer-{}", self.name))
            .spawn(move || {
                info!(
                    "Timer `{}` running every {:?} (repeat: {})",
                    self.name, self.interval, self.repeat
                );
                loop {
                    match shutdown.recv_timeout(self.interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        // Sender dropped on stop
                        Err(RecvTimeoutError::Disconnected) | Ok(()) => break,
                    }

                    let ctl = &runtime.ctl;
                    let callback = &mut self.callback;
                    let flow = runtime
                        .gate
                        .invoke(&self.name, |handler| callback(handler, ctl));
                    if flow.is_break() || !self.repeat {
                        break;
                    }
                }
                debug!("Timer `{}` exited", self.name);
            })
    }
}

impl<H> std::fmt::Debug for TimerEntry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerEntry")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("repeat", &self.repeat)
            .finish()
    }
}
