//! Physical port descriptions and port status notifications.

use byte_struct::*;

use crate::{enum_with_unknown, DatapathId, MacAddr};

/// Send the packet back out the port it arrived on
pub const OFPP_IN_PORT: u16 = 0xFFF8;

/// Perform actions in the flow table
pub const OFPP_TABLE: u16 = 0xFFF9;

/// Process with normal L2/L3 switching
pub const OFPP_NORMAL: u16 = 0xFFFA;

/// All physical ports except the input port and those disabled by STP
pub const OFPP_FLOOD: u16 = 0xFFFB;

/// All physical ports except the input port
pub const OFPP_ALL: u16 = 0xFFFC;

/// Send to the controller
pub const OFPP_CONTROLLER: u16 = 0xFFFD;

/// Local openflow port
pub const OFPP_LOCAL: u16 = 0xFFFE;

/// Description of a physical port as reported by the switch.
#[derive(ByteStruct, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[byte_struct_be]
pub struct PhysicalPort {
    pub port_no: u16,
    pub hw_addr: MacAddr,
    pub name: [u8; 16],
    pub config: u32,
    pub state: u32,
    pub curr: u32,
    pub advertised: u32,
    pub supported: u32,
    pub peer: u32,
}

impl PhysicalPort {
    /// Interface name with the trailing NUL padding removed
    pub fn name(&self) -> String {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// Whether the port is administratively down
    pub fn is_down(&self) -> bool {
        self.config & 0x1 != 0
    }
}

enum_with_unknown!(
    /// Why a port status notification was sent
    pub enum PortReason(u8) {
        Add = 0,
        Delete = 1,
        Modify = 2,
    }
);

/// Port status body layout on the wire
#[derive(ByteStruct, Clone, Copy, Debug, Default)]
#[byte_struct_be]
pub(crate) struct PortStatusWire {
    pub reason: u8,
    pub pad: [u8; 7],
    pub desc: PhysicalPort,
}

/// A port was added, removed, or modified on a switch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortStatus {
    /// Owning switch, stamped by the controller on receipt
    pub datapath_id: Option<DatapathId>,
    pub reason: PortReason,
    pub desc: PhysicalPort,
}

impl PortStatus {
    pub(crate) fn from_wire(wire: PortStatusWire) -> Self {
        Self {
            datapath_id: None,
            reason: PortReason::from(wire.reason),
            desc: wire.desc,
        }
    }

    pub(crate) fn to_wire(&self) -> PortStatusWire {
        PortStatusWire {
            reason: u8::from(self.reason),
            pad: [0; 7],
            desc: self.desc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_port_is_48_bytes() {
        assert_eq!(PhysicalPort::BYTE_LEN, 48);
        assert_eq!(PortStatusWire::BYTE_LEN, 56);
    }

    #[test]
    fn port_name_strips_padding() {
        let mut port = PhysicalPort::default();
        port.name[..4].copy_from_slice(b"eth0");
        assert_eq!(port.name(), "eth0");
    }
}
