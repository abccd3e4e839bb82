//! Cloneable handle for sending commands to switches and stopping the controller.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use trellis_shared::{DatapathId, Message};

use super::lifecycle::Lifecycle;
use crate::builders::{
    build_flow_mod_add, build_flow_mod_delete, build_flow_mod_modify, build_packet_out,
    FlowModOptions, PacketOutOptions,
};
use crate::error::Result;
use crate::handler::in_handler;
use crate::registry::SwitchRegistry;

/// Handle to a controller, given to every handler and available to the
/// hosting application via [`Controller::handle`](super::Controller::handle).
///
/// Sends resolve the target through the switch registry. A switch that is not
/// connected, or a transport error, is logged and the message dropped; the
/// `send_*` methods report whether the message was written.
#[derive(Clone, Debug)]
pub struct ControllerHandle {
    switches: SwitchRegistry,
    lifecycle: Arc<Lifecycle>,
}

impl ControllerHandle {
    pub(crate) fn new(switches: SwitchRegistry, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            switches,
            lifecycle,
        }
    }

    /// Currently connected switches
    pub fn switches(&self) -> &SwitchRegistry {
        &self.switches
    }

    pub(crate) fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    /// Send an already-built message.
    pub fn send_message(&self, datapath_id: DatapathId, msg: &Message) -> bool {
        match self.switches.send(datapath_id, msg) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping {:?} (xid {}): {e}", msg.message_type(), msg.xid);
                false
            }
        }
    }

    /// Install a flow entry.
    ///
    /// # Errors
    ///
    /// * If `options` has no match
    pub fn send_flow_mod_add(
        &self,
        datapath_id: DatapathId,
        options: &FlowModOptions,
    ) -> Result<bool> {
        let msg = build_flow_mod_add(options)?;
        Ok(self.send_message(datapath_id, &msg))
    }

    /// Change the actions of matching flow entries.
    pub fn send_flow_mod_modify(
        &self,
        datapath_id: DatapathId,
        options: &FlowModOptions,
    ) -> Result<bool> {
        let msg = build_flow_mod_modify(options)?;
        Ok(self.send_message(datapath_id, &msg))
    }

    /// Remove matching flow entries.
    pub fn send_flow_mod_delete(
        &self,
        datapath_id: DatapathId,
        options: &FlowModOptions,
    ) -> Result<bool> {
        let msg = build_flow_mod_delete(options)?;
        Ok(self.send_message(datapath_id, &msg))
    }

    /// Emit a packet from the switch.
    ///
    /// # Errors
    ///
    /// * If `options` has neither a packet-in to replay nor raw data
    pub fn send_packet_out(
        &self,
        datapath_id: DatapathId,
        options: &PacketOutOptions,
    ) -> Result<bool> {
        let msg = build_packet_out(options)?;
        Ok(self.send_message(datapath_id, &msg))
    }

    /// Stop the controller: stop accepting, close every switch connection,
    /// end every timer, and release the listening socket.
    ///
    /// Safe to call any number of times from any thread; returns `true` only
    /// for the call that initiated the stop. Unless called from inside a
    /// handler, it waits for a running controller to finish, after which no
    /// handler will be invoked again.
    pub fn stop(&self) -> bool {
        let initiated = self.lifecycle.request_stop();
        if !in_handler() {
            self.lifecycle.wait_finished();
        }
        initiated
    }

    /// Whether a stop has been requested
    pub fn is_stopping(&self) -> bool {
        self.lifecycle.is_stopping()
    }

    /// Address the controller is listening on, once it is listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.local_addr()
    }

    /// Wait up to `timeout` for the controller to start listening.
    pub fn wait_listening(&self, timeout: Duration) -> Option<SocketAddr> {
        self.lifecycle.wait_listening(timeout)
    }
}
