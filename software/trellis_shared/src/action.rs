//! Flow and packet-out actions.
//!
//! Each action is a 4-byte `{type, len}` header followed by its payload,
//! padded to a multiple of 8 bytes.

use crate::codec::{length_field, CodecError};
use crate::MacAddr;

/// Length in bytes of the header in front of every action
const ACTION_HEADER_LEN: usize = 4;

/// An action applied to matching packets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Output to a port; `max_len` bounds the bytes sent to the controller
    Output { port: u16, max_len: u16 },
    SetVlanVid(u16),
    SetVlanPcp(u8),
    StripVlan,
    SetDlSrc(MacAddr),
    SetDlDst(MacAddr),
    SetNwSrc(u32),
    SetNwDst(u32),
    SetNwTos(u8),
    SetTpSrc(u16),
    SetTpDst(u16),
    /// Output to a queue attached to a port
    Enqueue { port: u16, queue_id: u32 },
    /// Action kind this codec does not interpret, kept verbatim
    Unknown { action_type: u16, payload: Vec<u8> },
}

impl Action {
    /// Output to `port`, sending whole packets to the controller if that is the port
    pub fn output(port: u16) -> Self {
        Self::Output {
            port,
            max_len: 0xFFFF,
        }
    }

    fn action_type(&self) -> u16 {
        match self {
            Self::Output { .. } => 0,
            Self::SetVlanVid(_) => 1,
            Self::SetVlanPcp(_) => 2,
            Self::StripVlan => 3,
            Self::SetDlSrc(_) => 4,
            Self::SetDlDst(_) => 5,
            Self::SetNwSrc(_) => 6,
            Self::SetNwDst(_) => 7,
            Self::SetNwTos(_) => 8,
            Self::SetTpSrc(_) => 9,
            Self::SetTpDst(_) => 10,
            Self::Enqueue { .. } => 11,
            Self::Unknown { action_type, .. } => *action_type,
        }
    }

    /// Payload bytes after the action header, before padding
    fn payload(&self) -> Vec<u8> {
        match self {
            Self::Output { port, max_len } => {
                let mut p = port.to_be_bytes().to_vec();
                p.extend_from_slice(&max_len.to_be_bytes());
                p
            }
            Self::SetVlanVid(vid) => vid.to_be_bytes().to_vec(),
            Self::SetVlanPcp(pcp) => vec![*pcp],
            Self::StripVlan => Vec::new(),
            Self::SetDlSrc(mac) | Self::SetDlDst(mac) => mac.to_vec(),
            Self::SetNwSrc(addr) | Self::SetNwDst(addr) => addr.to_be_bytes().to_vec(),
            Self::SetNwTos(tos) => vec![*tos],
            Self::SetTpSrc(tp) | Self::SetTpDst(tp) => tp.to_be_bytes().to_vec(),
            Self::Enqueue { port, queue_id } => {
                let mut p = port.to_be_bytes().to_vec();
                p.extend_from_slice(&[0; 6]);
                p.extend_from_slice(&queue_id.to_be_bytes());
                p
            }
            Self::Unknown { payload, .. } => payload.clone(),
        }
    }

    /// Append the wire form of this action to `out`.
    ///
    /// Fails if the padded action does not fit its 16-bit length field.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        let payload = self.payload();
        let len = (ACTION_HEADER_LEN + payload.len()).next_multiple_of(8);
        let wire_len = length_field("action", len)?;
        out.extend_from_slice(&self.action_type().to_be_bytes());
        out.extend_from_slice(&wire_len.to_be_bytes());
        out.extend_from_slice(&payload);
        out.resize(out.len() + len - ACTION_HEADER_LEN - payload.len(), 0);
        Ok(())
    }

    /// Parse one action from the front of `bytes`,
    /// returning it along with the number of bytes consumed.
    pub fn read(bytes: &[u8]) -> Result<(Self, usize), String> {
        if bytes.len() < ACTION_HEADER_LEN {
            return Err(format!("action header needs 4 bytes, have {}", bytes.len()));
        }
        let action_type = u16::from_be_bytes([bytes[0], bytes[1]]);
        let len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        if len < 8 || len % 8 != 0 || len > bytes.len() {
            return Err(format!("invalid action length {len}"));
        }
        let p = &bytes[ACTION_HEADER_LEN..len];
        let be16 = |i: usize| u16::from_be_bytes([p[i], p[i + 1]]);
        let be32 = |i: usize| u32::from_be_bytes([p[i], p[i + 1], p[i + 2], p[i + 3]]);
        let mac = |p: &[u8]| {
            let mut m = [0_u8; 6];
            m.copy_from_slice(&p[..6]);
            m
        };

        let action = match action_type {
            0 => Self::Output {
                port: be16(0),
                max_len: be16(2),
            },
            1 => Self::SetVlanVid(be16(0)),
            2 => Self::SetVlanPcp(p[0]),
            3 => Self::StripVlan,
            4 if len >= 16 => Self::SetDlSrc(mac(p)),
            5 if len >= 16 => Self::SetDlDst(mac(p)),
            6 => Self::SetNwSrc(be32(0)),
            7 => Self::SetNwDst(be32(0)),
            8 => Self::SetNwTos(p[0]),
            9 => Self::SetTpSrc(be16(0)),
            10 => Self::SetTpDst(be16(0)),
            11 if len >= 16 => Self::Enqueue {
                port: be16(0),
                queue_id: be32(8),
            },
            4 | 5 | 11 => return Err(format!("action type {action_type} is too short")),
            _ => Self::Unknown {
                action_type,
                payload: p.to_vec(),
            },
        };

        Ok((action, len))
    }
}

/// Append a list of actions to `out`
pub fn write_actions(actions: &[Action], out: &mut Vec<u8>) -> Result<(), CodecError> {
    for action in actions {
        action.write(out)?;
    }
    Ok(())
}

/// Parse a contiguous run of actions that fills `bytes` exactly
pub fn read_actions(mut bytes: &[u8]) -> Result<Vec<Action>, String> {
    let mut actions = Vec::new();
    while !bytes.is_empty() {
        let (action, used) = Action::read(bytes)?;
        actions.push(action);
        bytes = &bytes[used..];
    }
    Ok(actions)
}
