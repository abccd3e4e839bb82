//! Worker that owns one accepted switch connection on its own thread.
//!
//! The worker runs the handshake, registers the switch, dispatches its
//! messages until the connection ends, and then cleans up.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};

use tracing::{debug, info, warn};

use trellis_shared::DatapathId;

use super::Runtime;
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::handler::Handler;
use crate::handshake::Handshake;
use crate::registry::{ConnectionId, SwitchConnection};

/// Worker for one accepted connection.
pub(crate) struct ConnectionWorker<H> {
    conn_id: ConnectionId,
    peer: SocketAddr,
    stream: TcpStream,
    runtime: Arc<Runtime<H>>,
}

impl<H: Handler> ConnectionWorker<H> {
    pub(crate) fn new(
        conn_id: ConnectionId,
        peer: SocketAddr,
        stream: TcpStream,
        runtime: Arc<Runtime<H>>,
    ) -> Self {
        Self {
            conn_id,
            peer,
            stream,
            runtime,
        }
    }

    /// Start the worker on a dedicated thread.
    pub(crate) fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        Builder::new()
            .name(format!("switch-conn-{}", self.conn_id))
            .spawn(move || self.run())
    }

    /// Run the connection to completion.
    pub(crate) fn run(mut self) {
        let lifecycle = self.runtime.ctl.lifecycle().clone();

        let handshake = Handshake::new(&mut self.stream).run();
        match handshake {
            Ok(features) => self.serve(features.datapath_id),
            Err(e) if lifecycle.is_stopping() => {
                debug!("Connection {} from {} closed during stop: {e}", self.conn_id, self.peer);
            }
            Err(e) => warn!("Dropping connection {} from {}: {e}", self.conn_id, self.peer),
        }

        lifecycle.forget(self.conn_id);
    }

    /// Register an identified switch and dispatch its messages.
    fn serve(&mut self, datapath_id: DatapathId) {
        let runtime = &self.runtime;
        let writer = match self.stream.try_clone() {
            Ok(writer) => writer,
            Err(e) => {
                warn!("Unable to split connection for switch {datapath_id:#018x}: {e}");
                return;
            }
        };
        let conn = SwitchConnection::new(self.conn_id, Some(self.peer), Box::new(writer));
        runtime.ctl.switches().put(datapath_id, conn);
        info!(
            "Switch {datapath_id:#018x} connected from {} (connection {})",
            self.peer, self.conn_id
        );

        let ready = runtime
            .gate
            .invoke("switch_ready", |h| h.switch_ready(&runtime.ctl, datapath_id));

        if ready.is_continue() {
            let dispatcher = Dispatcher::new(datapath_id, &runtime.gate, &runtime.ctl);
            match dispatcher.run(&mut self.stream) {
                Ok(()) => {}
                Err(e @ Error::ProtocolViolation { .. }) => {
                    let _ = runtime
                        .ctl
                        .lifecycle()
                        .escalate(runtime.config.protocol_violation, e);
                }
                Err(e) if runtime.ctl.is_stopping() => debug!("{e}"),
                Err(e) => info!("{e}"),
            }
        }

        // A successor that re-registered the same datapath id keeps its place
        let was_registered = runtime
            .ctl
            .switches()
            .delete_connection(datapath_id, self.conn_id);
        if was_registered {
            let _ = runtime.gate.invoke("switch_disconnected", |h| {
                h.switch_disconnected(&runtime.ctl, datapath_id)
            });
        }
        info!(
            "Switch {datapath_id:#018x} disconnected (connection {})",
            self.conn_id
        );
    }
}
