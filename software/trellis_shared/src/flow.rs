//! Flow table match, modification, and removal formats.

use byte_struct::*;

use crate::action::Action;
use crate::{enum_with_unknown, DatapathId, MacAddr};

/// Wildcard bits of [`Match::wildcards`]
pub mod wildcards {
    pub const IN_PORT: u32 = 1 << 0;
    pub const DL_VLAN: u32 = 1 << 1;
    pub const DL_SRC: u32 = 1 << 2;
    pub const DL_DST: u32 = 1 << 3;
    pub const DL_TYPE: u32 = 1 << 4;
    pub const NW_PROTO: u32 = 1 << 5;
    pub const TP_SRC: u32 = 1 << 6;
    pub const TP_DST: u32 = 1 << 7;
    pub const NW_SRC_SHIFT: u32 = 8;
    pub const NW_SRC_MASK: u32 = 0x3F << NW_SRC_SHIFT;
    pub const NW_DST_SHIFT: u32 = 14;
    pub const NW_DST_MASK: u32 = 0x3F << NW_DST_SHIFT;
    pub const DL_VLAN_PCP: u32 = 1 << 20;
    pub const NW_TOS: u32 = 1 << 21;
    pub const ALL: u32 = (1 << 22) - 1;
}

/// Fields to match against packets.
///
/// A set bit in `wildcards` means the corresponding field is ignored.
/// The default match wildcards every field.
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct Match {
    pub wildcards: u32,
    pub in_port: u16,
    pub dl_src: MacAddr,
    pub dl_dst: MacAddr,
    pub dl_vlan: u16,
    pub dl_vlan_pcp: u8,
    pub pad1: u8,
    pub dl_type: u16,
    pub nw_tos: u8,
    pub nw_proto: u8,
    pub pad2: [u8; 2],
    pub nw_src: u32,
    pub nw_dst: u32,
    pub tp_src: u16,
    pub tp_dst: u16,
}

impl Default for Match {
    fn default() -> Self {
        Self {
            wildcards: wildcards::ALL,
            in_port: 0,
            dl_src: [0; 6],
            dl_dst: [0; 6],
            dl_vlan: 0,
            dl_vlan_pcp: 0,
            pad1: 0,
            dl_type: 0,
            nw_tos: 0,
            nw_proto: 0,
            pad2: [0; 2],
            nw_src: 0,
            nw_dst: 0,
            tp_src: 0,
            tp_dst: 0,
        }
    }
}

impl Match {
    pub fn in_port(mut self, port: u16) -> Self {
        self.in_port = port;
        self.wildcards &= !wildcards::IN_PORT;
        self
    }

    pub fn dl_src(mut self, mac: MacAddr) -> Self {
        self.dl_src = mac;
        self.wildcards &= !wildcards::DL_SRC;
        self
    }

    pub fn dl_dst(mut self, mac: MacAddr) -> Self {
        self.dl_dst = mac;
        self.wildcards &= !wildcards::DL_DST;
        self
    }

    pub fn dl_vlan(mut self, vlan: u16) -> Self {
        self.dl_vlan = vlan;
        self.wildcards &= !wildcards::DL_VLAN;
        self
    }

    pub fn dl_type(mut self, ether_type: u16) -> Self {
        self.dl_type = ether_type;
        self.wildcards &= !wildcards::DL_TYPE;
        self
    }

    pub fn nw_proto(mut self, proto: u8) -> Self {
        self.nw_proto = proto;
        self.wildcards &= !wildcards::NW_PROTO;
        self
    }

    /// Match the full source address
    pub fn nw_src(mut self, addr: u32) -> Self {
        self.nw_src = addr;
        self.wildcards &= !wildcards::NW_SRC_MASK;
        self
    }

    /// Match the full destination address
    pub fn nw_dst(mut self, addr: u32) -> Self {
        self.nw_dst = addr;
        self.wildcards &= !wildcards::NW_DST_MASK;
        self
    }

    pub fn tp_src(mut self, port: u16) -> Self {
        self.tp_src = port;
        self.wildcards &= !wildcards::TP_SRC;
        self
    }

    pub fn tp_dst(mut self, port: u16) -> Self {
        self.tp_dst = port;
        self.wildcards &= !wildcards::TP_DST;
        self
    }
}

enum_with_unknown!(
    /// Flow table modification kind
    pub enum FlowModCommand(u16) {
        Add = 0,
        Modify = 1,
        ModifyStrict = 2,
        Delete = 3,
        DeleteStrict = 4,
    }
);

enum_with_unknown!(
    /// Why a flow was removed from a switch's table
    pub enum FlowRemovedReason(u8) {
        IdleTimeout = 0,
        HardTimeout = 1,
        Delete = 2,
    }
);

/// Flag asking the switch to send a flow-removed message for this entry
pub const OFPFF_SEND_FLOW_REM: u16 = 1 << 0;

/// Fixed part of a flow-mod body, followed by its actions
#[derive(ByteStruct, Clone, Copy, Debug, Default)]
#[byte_struct_be]
pub(crate) struct FlowModWire {
    pub pattern: Match,
    pub cookie: u64,
    pub command: u16,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub priority: u16,
    pub buffer_id: u32,
    pub out_port: u16,
    pub flags: u16,
}

/// Command to install, change, or remove flow table entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowMod {
    pub pattern: Match,
    pub cookie: u64,
    pub command: FlowModCommand,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub priority: u16,
    pub buffer_id: u32,
    pub out_port: u16,
    pub flags: u16,
    pub actions: Vec<Action>,
}

impl FlowMod {
    pub(crate) fn from_wire(wire: FlowModWire, actions: Vec<Action>) -> Self {
        Self {
            pattern: wire.pattern,
            cookie: wire.cookie,
            command: FlowModCommand::from(wire.command),
            idle_timeout: wire.idle_timeout,
            hard_timeout: wire.hard_timeout,
            priority: wire.priority,
            buffer_id: wire.buffer_id,
            out_port: wire.out_port,
            flags: wire.flags,
            actions,
        }
    }

    pub(crate) fn to_wire(&self) -> FlowModWire {
        FlowModWire {
            pattern: self.pattern,
            cookie: self.cookie,
            command: u16::from(self.command),
            idle_timeout: self.idle_timeout,
            hard_timeout: self.hard_timeout,
            priority: self.priority,
            buffer_id: self.buffer_id,
            out_port: self.out_port,
            flags: self.flags,
        }
    }
}

/// Flow-removed body layout on the wire
#[derive(ByteStruct, Clone, Copy, Debug, Default)]
#[byte_struct_be]
pub(crate) struct FlowRemovedWire {
    pub pattern: Match,
    pub cookie: u64,
    pub priority: u16,
    pub reason: u8,
    pub pad: u8,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub idle_timeout: u16,
    pub pad2: [u8; 2],
    pub packet_count: u64,
    pub byte_count: u64,
}

/// A flow entry expired or was deleted on a switch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowRemoved {
    /// Owning switch, stamped by the controller on receipt
    pub datapath_id: Option<DatapathId>,
    pub pattern: Match,
    pub cookie: u64,
    pub priority: u16,
    pub reason: FlowRemovedReason,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub idle_timeout: u16,
    pub packet_count: u64,
    pub byte_count: u64,
}

impl FlowRemoved {
    pub(crate) fn from_wire(wire: FlowRemovedWire) -> Self {
        Self {
            datapath_id: None,
            pattern: wire.pattern,
            cookie: wire.cookie,
            priority: wire.priority,
            reason: FlowRemovedReason::from(wire.reason),
            duration_sec: wire.duration_sec,
            duration_nsec: wire.duration_nsec,
            idle_timeout: wire.idle_timeout,
            packet_count: wire.packet_count,
            byte_count: wire.byte_count,
        }
    }

    pub(crate) fn to_wire(&self) -> FlowRemovedWire {
        FlowRemovedWire {
            pattern: self.pattern,
            cookie: self.cookie,
            priority: self.priority,
            reason: u8::from(self.reason),
            pad: 0,
            duration_sec: self.duration_sec,
            duration_nsec: self.duration_nsec,
            idle_timeout: self.idle_timeout,
            pad2: [0; 2],
            packet_count: self.packet_count,
            byte_count: self.byte_count,
        }
    }
}
