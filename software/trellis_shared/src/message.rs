//! Typed message bodies and their conversion to and from body bytes.

use byte_struct::*;

use crate::action::{read_actions, write_actions, Action};
use crate::codec::{length_field, CodecError};
use crate::flow::{FlowMod, FlowModWire, FlowRemoved, FlowRemovedWire};
use crate::header::MessageType;
use crate::port::{PhysicalPort, PortStatus, PortStatusWire};
use crate::{enum_with_unknown, DatapathId};

/// A decoded protocol message and its transaction id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub xid: u32,
    pub body: MessageBody,
}

impl Message {
    pub fn new(xid: u32, body: MessageBody) -> Self {
        Self { xid, body }
    }

    /// Message kind code for the header
    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }
}

/// Tagged union of the message kinds understood by this codec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageBody {
    Hello,
    Error(ErrorMsg),
    EchoRequest(Vec<u8>),
    EchoReply(Vec<u8>),
    FeaturesRequest,
    FeaturesReply(FeaturesReply),
    PacketIn(PacketIn),
    FlowRemoved(FlowRemoved),
    PortStatus(PortStatus),
    PacketOut(PacketOut),
    FlowMod(FlowMod),
    BarrierRequest,
    BarrierReply,
    /// A well-framed message of a kind without a typed body here
    Unsupported { msg_type: MessageType, body: Vec<u8> },
}

impl MessageBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Hello => MessageType::Hello,
            Self::Error(_) => MessageType::Error,
            Self::EchoRequest(_) => MessageType::EchoRequest,
            Self::EchoReply(_) => MessageType::EchoReply,
            Self::FeaturesRequest => MessageType::FeaturesRequest,
            Self::FeaturesReply(_) => MessageType::FeaturesReply,
            Self::PacketIn(_) => MessageType::PacketIn,
            Self::FlowRemoved(_) => MessageType::FlowRemoved,
            Self::PortStatus(_) => MessageType::PortStatus,
            Self::PacketOut(_) => MessageType::PacketOut,
            Self::FlowMod(_) => MessageType::FlowMod,
            Self::BarrierRequest => MessageType::BarrierRequest,
            Self::BarrierReply => MessageType::BarrierReply,
            Self::Unsupported { msg_type, .. } => *msg_type,
        }
    }

    /// Parse the body bytes that followed a header of kind `msg_type`
    pub fn decode(msg_type: MessageType, body: &[u8]) -> Result<Self, CodecError> {
        let malformed = |reason: String| CodecError::Malformed { msg_type, reason };
        let need = |len: usize| {
            if body.len() < len {
                Err(malformed(format!(
                    "body needs at least {len} bytes, have {}",
                    body.len()
                )))
            } else {
                Ok(())
            }
        };

        let parsed = match msg_type {
            MessageType::Hello => Self::Hello,
            MessageType::EchoRequest => Self::EchoRequest(body.to_vec()),
            MessageType::EchoReply => Self::EchoReply(body.to_vec()),
            MessageType::FeaturesRequest => Self::FeaturesRequest,
            MessageType::BarrierRequest => Self::BarrierRequest,
            MessageType::BarrierReply => Self::BarrierReply,
            MessageType::Error => {
                need(ErrorWire::BYTE_LEN)?;
                let wire = ErrorWire::read_bytes(&body[..ErrorWire::BYTE_LEN]);
                Self::Error(ErrorMsg {
                    datapath_id: None,
                    error_type: wire.error_type,
                    code: wire.code,
                    data: body[ErrorWire::BYTE_LEN..].to_vec(),
                })
            }
            MessageType::FeaturesReply => {
                need(FeaturesWire::BYTE_LEN)?;
                let wire = FeaturesWire::read_bytes(&body[..FeaturesWire::BYTE_LEN]);
                let port_bytes = &body[FeaturesWire::BYTE_LEN..];
                if port_bytes.len() % PhysicalPort::BYTE_LEN != 0 {
                    return Err(malformed(format!(
                        "{} trailing bytes do not form whole port descriptions",
                        port_bytes.len()
                    )));
                }
                let ports = port_bytes
                    .chunks_exact(PhysicalPort::BYTE_LEN)
                    .map(PhysicalPort::read_bytes)
                    .collect();
                Self::FeaturesReply(FeaturesReply {
                    datapath_id: wire.datapath_id,
                    n_buffers: wire.n_buffers,
                    n_tables: wire.n_tables,
                    capabilities: wire.capabilities,
                    actions: wire.actions,
                    ports,
                })
            }
            MessageType::PacketIn => {
                need(PacketInWire::BYTE_LEN)?;
                let wire = PacketInWire::read_bytes(&body[..PacketInWire::BYTE_LEN]);
                Self::PacketIn(PacketIn {
                    datapath_id: None,
                    buffer_id: wire.buffer_id,
                    total_len: wire.total_len,
                    in_port: wire.in_port,
                    reason: PacketInReason::from(wire.reason),
                    raw_data: body[PacketInWire::BYTE_LEN..].to_vec(),
                })
            }
            MessageType::FlowRemoved => {
                need(FlowRemovedWire::BYTE_LEN)?;
                let wire = FlowRemovedWire::read_bytes(&body[..FlowRemovedWire::BYTE_LEN]);
                Self::FlowRemoved(FlowRemoved::from_wire(wire))
            }
            MessageType::PortStatus => {
                need(PortStatusWire::BYTE_LEN)?;
                let wire = PortStatusWire::read_bytes(&body[..PortStatusWire::BYTE_LEN]);
                Self::PortStatus(PortStatus::from_wire(wire))
            }
            MessageType::PacketOut => {
                need(PacketOutWire::BYTE_LEN)?;
                let wire = PacketOutWire::read_bytes(&body[..PacketOutWire::BYTE_LEN]);
                let actions_end = PacketOutWire::BYTE_LEN + wire.actions_len as usize;
                need(actions_end)?;
                let actions =
                    read_actions(&body[PacketOutWire::BYTE_LEN..actions_end]).map_err(malformed)?;
                Self::PacketOut(PacketOut {
                    buffer_id: wire.buffer_id,
                    in_port: wire.in_port,
                    actions,
                    raw_data: body[actions_end..].to_vec(),
                })
            }
            MessageType::FlowMod => {
                need(FlowModWire::BYTE_LEN)?;
                let wire = FlowModWire::read_bytes(&body[..FlowModWire::BYTE_LEN]);
                let actions = read_actions(&body[FlowModWire::BYTE_LEN..]).map_err(malformed)?;
                Self::FlowMod(FlowMod::from_wire(wire, actions))
            }
            other => Self::Unsupported {
                msg_type: other,
                body: body.to_vec(),
            },
        };

        Ok(parsed)
    }

    /// Append the body bytes of this message to `out`
    pub fn write_body(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        match self {
            Self::Hello | Self::FeaturesRequest | Self::BarrierRequest | Self::BarrierReply => {}
            Self::EchoRequest(data) | Self::EchoReply(data) => out.extend_from_slice(data),
            Self::Unsupported { body, .. } => out.extend_from_slice(body),
            Self::Error(err) => {
                let wire = ErrorWire {
                    error_type: err.error_type,
                    code: err.code,
                };
                write_struct(&wire, out);
                out.extend_from_slice(&err.data);
            }
            Self::FeaturesReply(features) => {
                let wire = FeaturesWire {
                    datapath_id: features.datapath_id,
                    n_buffers: features.n_buffers,
                    n_tables: features.n_tables,
                    pad: [0; 3],
                    capabilities: features.capabilities,
                    actions: features.actions,
                };
                write_struct(&wire, out);
                for port in features.ports.iter() {
                    write_struct(port, out);
                }
            }
            Self::PacketIn(packet_in) => {
                let wire = PacketInWire {
                    buffer_id: packet_in.buffer_id,
                    total_len: packet_in.total_len,
                    in_port: packet_in.in_port,
                    reason: u8::from(packet_in.reason),
                    pad: 0,
                };
                write_struct(&wire, out);
                out.extend_from_slice(&packet_in.raw_data);
            }
            Self::FlowRemoved(removed) => write_struct(&removed.to_wire(), out),
            Self::PortStatus(status) => write_struct(&status.to_wire(), out),
            Self::PacketOut(packet_out) => {
                let mut actions = Vec::new();
                write_actions(&packet_out.actions, &mut actions)?;
                let wire = PacketOutWire {
                    buffer_id: packet_out.buffer_id,
                    in_port: packet_out.in_port,
                    actions_len: length_field("action list", actions.len())?,
                };
                write_struct(&wire, out);
                out.extend_from_slice(&actions);
                out.extend_from_slice(&packet_out.raw_data);
            }
            Self::FlowMod(flow_mod) => {
                write_struct(&flow_mod.to_wire(), out);
                write_actions(&flow_mod.actions, out)?;
            }
        }
        Ok(())
    }
}

/// Append a fixed-layout struct to `out`
fn write_struct<T: ByteStruct>(value: &T, out: &mut Vec<u8>) {
    let start = out.len();
    out.resize(start + T::BYTE_LEN, 0);
    value.write_bytes(&mut out[start..]);
}

#[derive(ByteStruct, Clone, Copy, Debug, Default)]
#[byte_struct_be]
struct ErrorWire {
    error_type: u16,
    code: u16,
}

/// Error notification from a switch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorMsg {
    /// Owning switch, stamped by the controller on receipt
    pub datapath_id: Option<DatapathId>,
    pub error_type: u16,
    pub code: u16,
    /// At least the first 64 bytes of the request that failed
    pub data: Vec<u8>,
}

#[derive(ByteStruct, Clone, Copy, Debug, Default)]
#[byte_struct_be]
struct FeaturesWire {
    datapath_id: u64,
    n_buffers: u32,
    n_tables: u8,
    pad: [u8; 3],
    capabilities: u32,
    actions: u32,
}

/// Switch identity and capabilities, answering a features request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeaturesReply {
    pub datapath_id: DatapathId,
    pub n_buffers: u32,
    pub n_tables: u8,
    pub capabilities: u32,
    pub actions: u32,
    pub ports: Vec<PhysicalPort>,
}

enum_with_unknown!(
    /// Why a packet was sent to the controller
    pub enum PacketInReason(u8) {
        NoMatch = 0,
        Action = 1,
    }
);

#[derive(ByteStruct, Clone, Copy, Debug, Default)]
#[byte_struct_be]
struct PacketInWire {
    buffer_id: u32,
    total_len: u16,
    in_port: u16,
    reason: u8,
    pad: u8,
}

/// A packet forwarded from a switch to the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketIn {
    /// Owning switch, stamped by the controller on receipt
    pub datapath_id: Option<DatapathId>,
    pub buffer_id: u32,
    pub total_len: u16,
    pub in_port: u16,
    pub reason: PacketInReason,
    pub raw_data: Vec<u8>,
}

impl PacketIn {
    /// Ethernet source address of the carried frame, if the frame is long enough
    pub fn source_mac(&self) -> Option<[u8; 6]> {
        self.raw_data.get(6..12).map(|s| {
            let mut mac = [0_u8; 6];
            mac.copy_from_slice(s);
            mac
        })
    }

    /// Ethernet destination address of the carried frame, if the frame is long enough
    pub fn destination_mac(&self) -> Option<[u8; 6]> {
        self.raw_data.get(0..6).map(|s| {
            let mut mac = [0_u8; 6];
            mac.copy_from_slice(s);
            mac
        })
    }
}

#[derive(ByteStruct, Clone, Copy, Debug, Default)]
#[byte_struct_be]
struct PacketOutWire {
    buffer_id: u32,
    in_port: u16,
    actions_len: u16,
}

/// Command asking a switch to emit a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketOut {
    pub buffer_id: u32,
    pub in_port: u16,
    pub actions: Vec<Action>,
    pub raw_data: Vec<u8>,
}
