//! Fixed header that prefixes every message on the wire.

use byte_struct::*;
pub use byte_struct::{ByteStruct, ByteStructLen};

use crate::enum_with_unknown;

/// Common header of every OpenFlow message.
///
/// `length` covers the header itself plus the body that follows.
#[derive(ByteStruct, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[byte_struct_be]
pub struct OfpHeader {
    pub version: u8,
    pub msg_type: u8,
    pub length: u16,
    pub xid: u32,
}

impl OfpHeader {
    /// Message kind carried after this header
    pub fn message_type(&self) -> MessageType {
        MessageType::from(self.msg_type)
    }

    /// Number of body bytes that follow the header
    pub fn body_len(&self) -> usize {
        (self.length as usize).saturating_sub(Self::BYTE_LEN)
    }
}

enum_with_unknown!(
    /// Message kind code points for OpenFlow 1.0
    pub enum MessageType(u8) {
        Hello = 0,
        Error = 1,
        EchoRequest = 2,
        EchoReply = 3,
        Vendor = 4,
        FeaturesRequest = 5,
        FeaturesReply = 6,
        GetConfigRequest = 7,
        GetConfigReply = 8,
        SetConfig = 9,
        PacketIn = 10,
        FlowRemoved = 11,
        PortStatus = 12,
        PacketOut = 13,
        FlowMod = 14,
        PortMod = 15,
        StatsRequest = 16,
        StatsReply = 17,
        BarrierRequest = 18,
        BarrierReply = 19,
        QueueGetConfigRequest = 20,
        QueueGetConfigReply = 21,
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_big_endian() {
        let header = OfpHeader {
            version: 1,
            msg_type: 2,
            length: 0x0102,
            xid: 0x0A0B_0C0D,
        };
        let mut bytes = [0_u8; OfpHeader::BYTE_LEN];
        header.write_bytes(&mut bytes);
        assert_eq!(bytes, [1, 2, 0x01, 0x02, 0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(OfpHeader::read_bytes(&bytes), header);
    }

    #[test]
    fn body_len_never_underflows() {
        let header = OfpHeader {
            length: 3,
            ..Default::default()
        };
        assert_eq!(header.body_len(), 0);
        assert_eq!(header.message_type(), MessageType::Hello);
    }
}
