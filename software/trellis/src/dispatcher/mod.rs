//! Per-switch read loop that routes decoded messages to application handlers.

use std::io::Read;
use std::ops::ControlFlow;

use tracing::debug;

use trellis_shared::{read_one, DatapathId, Message, MessageBody, PortReason};

use crate::controller::ControllerHandle;
use crate::error::{Error, Result};
use crate::handler::{Handler, HandlerGate};

/// Routes messages from one identified switch to the handlers.
pub(crate) struct Dispatcher<'a, H> {
    datapath_id: DatapathId,
    gate: &'a HandlerGate<H>,
    ctl: &'a ControllerHandle,
}

impl<'a, H: Handler> Dispatcher<'a, H> {
    pub(crate) fn new(
        datapath_id: DatapathId,
        gate: &'a HandlerGate<H>,
        ctl: &'a ControllerHandle,
    ) -> Self {
        Self {
            datapath_id,
            gate,
            ctl,
        }
    }

    /// Read and route messages in arrival order until the connection ends.
    ///
    /// Returns `Ok` when routing was halted by a stop or a handler fault,
    /// and an error when the connection was lost or the switch violated
    /// the protocol.
    pub(crate) fn run<R: Read + ?Sized>(&self, reader: &mut R) -> Result<()> {
        loop {
            let msg = read_one(reader).map_err(|e| Error::from_codec(self.datapath_id, e))?;
            if self.route(msg)?.is_break() {
                return Ok(());
            }
        }
    }

    /// Hand one message to the handler for its kind.
    pub(crate) fn route(&self, msg: Message) -> Result<ControlFlow<()>> {
        let dpid = self.datapath_id;
        let ctl = self.ctl;
        let xid = msg.xid;

        let flow = match msg.body {
            MessageBody::EchoRequest(_) => self
                .gate
                .invoke("echo_request", |h| h.echo_request(ctl, dpid, &msg)),
            // Answer to a keepalive the application sent; nothing to route
            MessageBody::EchoReply(_) => {
                debug!("Echo reply (xid {xid}) from switch {dpid:#018x}");
                ControlFlow::Continue(())
            }
            MessageBody::FeaturesReply(features) => self
                .gate
                .invoke("features_reply", |h| h.features_reply(ctl, dpid, &features)),
            MessageBody::PacketIn(mut packet_in) => {
                packet_in.datapath_id = Some(dpid);
                self.gate
                    .invoke("packet_in", |h| h.packet_in(ctl, dpid, &packet_in))
            }
            MessageBody::PortStatus(mut status) => {
                status.datapath_id = Some(dpid);
                match status.reason {
                    PortReason::Add => self
                        .gate
                        .invoke("port_add", |h| h.port_add(ctl, dpid, &status)),
                    PortReason::Delete => self
                        .gate
                        .invoke("port_delete", |h| h.port_delete(ctl, dpid, &status)),
                    PortReason::Modify => self
                        .gate
                        .invoke("port_modify", |h| h.port_modify(ctl, dpid, &status)),
                    PortReason::Unknown(reason) => {
                        return Err(Error::ProtocolViolation {
                            datapath_id: Some(dpid),
                            reason: format!("unknown port status reason {reason}"),
                        })
                    }
                }
            }
            MessageBody::FlowRemoved(mut removed) => {
                removed.datapath_id = Some(dpid);
                self.gate
                    .invoke("flow_removed", |h| h.flow_removed(ctl, dpid, &removed))
            }
            MessageBody::BarrierReply => self
                .gate
                .invoke("barrier_reply", |h| h.barrier_reply(ctl, dpid, xid)),
            MessageBody::Error(mut err) => {
                err.datapath_id = Some(dpid);
                self.gate
                    .invoke("openflow_error", |h| h.openflow_error(ctl, dpid, &err))
            }
            other => {
                return Err(Error::ProtocolViolation {
                    datapath_id: Some(dpid),
                    reason: format!("unexpected {:?} message", other.message_type()),
                })
            }
        };

        Ok(flow)
    }
}
