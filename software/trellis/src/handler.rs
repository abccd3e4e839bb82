//! Application event handlers and the controller-wide lock they run under.

use std::any::Any;
use std::cell::Cell;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use trellis_shared::{
    DatapathId, ErrorMsg, FeaturesReply, FlowRemoved, Message, MessageBody, PacketIn, PortStatus,
};

use crate::controller::lifecycle::Lifecycle;
use crate::controller::{ControllerHandle, FailurePolicy};
use crate::error::{Error, HandlerResult};

/// Callbacks an application may define for controller events.
///
/// Every method has a default, so an application implements only the events
/// it cares about. All defaults do nothing, except `echo_request`, which
/// answers the switch with an echo reply carrying the same transaction id.
///
/// The controller runs at most one handler body at a time across all switches
/// and timers, so implementations may mutate `self` without further locking.
/// Returning an error or panicking is a handler fault, handled according to
/// [`ControllerConfig::handler_fault`](crate::ControllerConfig::handler_fault).
#[allow(unused_variables)]
pub trait Handler: Send + 'static {
    /// Called once when the controller starts, with the arguments given to `run`
    fn start(&mut self, ctl: &ControllerHandle, args: &[String]) -> HandlerResult {
        Ok(())
    }

    /// A switch completed its handshake and is registered
    fn switch_ready(&mut self, ctl: &ControllerHandle, datapath_id: DatapathId) -> HandlerResult {
        Ok(())
    }

    /// A registered switch's connection was lost
    fn switch_disconnected(
        &mut self,
        ctl: &ControllerHandle,
        datapath_id: DatapathId,
    ) -> HandlerResult {
        Ok(())
    }

    /// A switch sent an echo request
    fn echo_request(
        &mut self,
        ctl: &ControllerHandle,
        datapath_id: DatapathId,
        msg: &Message,
    ) -> HandlerResult {
        let data = match &msg.body {
            MessageBody::EchoRequest(data) => data.clone(),
            _ => Vec::new(),
        };
        ctl.send_message(datapath_id, &Message::new(msg.xid, MessageBody::EchoReply(data)));
        Ok(())
    }

    /// A switch sent a features reply after the handshake
    fn features_reply(
        &mut self,
        ctl: &ControllerHandle,
        datapath_id: DatapathId,
        msg: &FeaturesReply,
    ) -> HandlerResult {
        Ok(())
    }

    fn packet_in(
        &mut self,
        ctl: &ControllerHandle,
        datapath_id: DatapathId,
        msg: &PacketIn,
    ) -> HandlerResult {
        Ok(())
    }

    fn port_add(
        &mut self,
        ctl: &ControllerHandle,
        datapath_id: DatapathId,
        msg: &PortStatus,
    ) -> HandlerResult {
        Ok(())
    }

    fn port_delete(
        &mut self,
        ctl: &ControllerHandle,
        datapath_id: DatapathId,
        msg: &PortStatus,
    ) -> HandlerResult {
        Ok(())
    }

    fn port_modify(
        &mut self,
        ctl: &ControllerHandle,
        datapath_id: DatapathId,
        msg: &PortStatus,
    ) -> HandlerResult {
        Ok(())
    }

    fn flow_removed(
        &mut self,
        ctl: &ControllerHandle,
        datapath_id: DatapathId,
        msg: &FlowRemoved,
    ) -> HandlerResult {
        Ok(())
    }

    /// A switch finished processing everything sent before a barrier request
    fn barrier_reply(
        &mut self,
        ctl: &ControllerHandle,
        datapath_id: DatapathId,
        xid: u32,
    ) -> HandlerResult {
        Ok(())
    }

    /// A switch reported an error for a request
    fn openflow_error(
        &mut self,
        ctl: &ControllerHandle,
        datapath_id: DatapathId,
        msg: &ErrorMsg,
    ) -> HandlerResult {
        Ok(())
    }
}

/// No handlers at all; every event is a no-op apart from echo replies
impl Handler for () {}

thread_local! {
    static IN_HANDLER: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is executing a handler body
pub(crate) fn in_handler() -> bool {
    IN_HANDLER.with(|flag| flag.get())
}

/// Marks the current thread as inside a handler until dropped
struct InHandlerGuard;

impl InHandlerGuard {
    fn enter() -> Self {
        IN_HANDLER.with(|flag| flag.set(true));
        Self
    }
}

impl Drop for InHandlerGuard {
    fn drop(&mut self) {
        IN_HANDLER.with(|flag| flag.set(false));
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_owned()
    }
}

/// The application's handlers behind the single controller-wide lock.
///
/// Every handler body and timer callback goes through [`HandlerGate::invoke`],
/// so exactly one runs at a time.
pub(crate) struct HandlerGate<H> {
    handler: Mutex<H>,
    lifecycle: Arc<Lifecycle>,
    policy: FailurePolicy,
}

impl<H: Handler> HandlerGate<H> {
    pub(crate) fn new(handler: H, lifecycle: Arc<Lifecycle>, policy: FailurePolicy) -> Self {
        Self {
            handler: Mutex::new(handler),
            lifecycle,
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, H> {
        self.handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run one handler body under the lock.
    ///
    /// Returns `Break` if the controller is stopping (the body is skipped)
    /// or if a fault in the body should stop the caller.
    pub(crate) fn invoke<F>(&self, event: &str, f: F) -> ControlFlow<()>
    where
        F: FnOnce(&mut H) -> HandlerResult,
    {
        let outcome = {
            let mut handler = self.lock();
            if self.lifecycle.is_stopping() {
                return ControlFlow::Break(());
            }
            let _in_handler = InHandlerGuard::enter();
            panic::catch_unwind(AssertUnwindSafe(|| f(&mut *handler)))
        };

        let reason = match outcome {
            Ok(Ok(())) => return ControlFlow::Continue(()),
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload),
        };
        let fault = Error::HandlerFault {
            event: event.to_owned(),
            reason,
        };
        self.lifecycle.escalate(self.policy, fault)
    }

    /// Access the handler state outside of event dispatch
    pub(crate) fn with_handler<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut *self.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        count: usize,
    }

    impl Handler for Counter {}

    fn gate(policy: FailurePolicy) -> HandlerGate<Counter> {
        HandlerGate::new(Counter::default(), Lifecycle::new(), policy)
    }

    #[test]
    fn invoke_runs_body() {
        let gate = gate(FailurePolicy::Isolate);
        let flow = gate.invoke("count", |h| {
            assert!(in_handler());
            h.count += 1;
            Ok(())
        });
        assert_eq!(flow, ControlFlow::Continue(()));
        assert!(!in_handler());
        assert_eq!(gate.with_handler(|h| h.count), 1);
    }

    #[test]
    fn bodies_are_skipped_once_stopping() {
        let gate = gate(FailurePolicy::Isolate);
        gate.lifecycle.request_stop();
        let flow = gate.invoke("count", |h| {
            h.count += 1;
            Ok(())
        });
        assert_eq!(flow, ControlFlow::Break(()));
        assert_eq!(gate.with_handler(|h| h.count), 0);
    }

    #[test]
    fn isolated_fault_continues() {
        let gate = gate(FailurePolicy::Isolate);
        let flow = gate.invoke("bad", |_| Err("broken".into()));
        assert_eq!(flow, ControlFlow::Continue(()));
        assert!(!gate.lifecycle.is_stopping());
    }

    #[test]
    fn panic_is_a_fault_and_shuts_down() {
        let gate = gate(FailurePolicy::Shutdown);
        let flow = gate.invoke("explode", |_| panic!("boom"));
        assert_eq!(flow, ControlFlow::Break(()));
        assert!(!in_handler());
        match gate.lifecycle.take_fatal() {
            Some(Error::HandlerFault { event, reason }) => {
                assert_eq!(event, "explode");
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected {other:?}"),
        }

        // The lock is not poisoned by the caught panic
        assert_eq!(gate.with_handler(|h| h.count), 0);
    }

    #[test]
    fn bodies_never_overlap() {
        let gate = Arc::new(gate(FailurePolicy::Isolate));
        let active = Arc::new(AtomicUsize::new(0));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let active = active.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        gate.invoke("count", |h| {
                            assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);
                            let seen = h.count;
                            std::thread::yield_now();
                            h.count = seen + 1;
                            active.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        });
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(gate.with_handler(|h| h.count), 1600);
    }
}
