//! Framing of messages on a byte stream.

use std::io::{self, Read};

use byte_struct::*;

use crate::header::{MessageType, OfpHeader};
use crate::message::{Message, MessageBody};
use crate::OFP_VERSION;

/// Failure to read or interpret one framed message.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The stream ended cleanly on a message boundary
    #[error("connection closed by peer")]
    Disconnected,

    /// The stream ended partway through a message
    #[error("stream closed mid-message: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    #[error("unsupported protocol version {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("invalid message length {0}")]
    InvalidLength(u16),

    /// An outbound frame or field does not fit its 16-bit length
    #[error("{field} of {len} bytes exceeds the {max}-byte limit")]
    Oversized {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("malformed {msg_type:?} message: {reason}")]
    Malformed { msg_type: MessageType, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Whether this error means the peer went away,
    /// as opposed to the peer sending something we could not understand.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Disconnected => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// Read until `buf` is full or the stream ends, returning the number of bytes read.
fn fill<R: Read + ?Sized>(stream: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read exactly one framed message from `stream`, blocking until its
/// whole body has arrived.
pub fn read_one<R: Read + ?Sized>(stream: &mut R) -> Result<Message, CodecError> {
    let mut header_buf = [0_u8; OfpHeader::BYTE_LEN];
    let received = fill(stream, &mut header_buf)?;
    if received == 0 {
        return Err(CodecError::Disconnected);
    }
    if received < OfpHeader::BYTE_LEN {
        return Err(CodecError::Truncated {
            expected: OfpHeader::BYTE_LEN,
            received,
        });
    }

    let header = OfpHeader::read_bytes(&header_buf);
    if header.version != OFP_VERSION {
        return Err(CodecError::UnsupportedVersion(header.version));
    }
    if (header.length as usize) < OfpHeader::BYTE_LEN {
        return Err(CodecError::InvalidLength(header.length));
    }

    let mut body = vec![0_u8; header.body_len()];
    let received = fill(stream, &mut body)?;
    if received < body.len() {
        return Err(CodecError::Truncated {
            expected: header.length as usize,
            received: OfpHeader::BYTE_LEN + received,
        });
    }

    let body = MessageBody::decode(header.message_type(), &body)?;
    Ok(Message::new(header.xid, body))
}

/// Check that a length fits a 16-bit length field
pub(crate) fn length_field(field: &'static str, len: usize) -> Result<u16, CodecError> {
    u16::try_from(len).map_err(|_| CodecError::Oversized {
        field,
        len,
        max: u16::MAX as usize,
    })
}

/// Wire bytes of `msg`, header included.
///
/// # Errors
///
/// * If the frame, or a length-prefixed field inside it, is too long
///   for its 16-bit length field
pub fn encode(msg: &Message) -> Result<Vec<u8>, CodecError> {
    let mut out = vec![0_u8; OfpHeader::BYTE_LEN];
    msg.body.write_body(&mut out)?;

    let header = OfpHeader {
        version: OFP_VERSION,
        msg_type: u8::from(msg.message_type()),
        length: length_field("message", out.len())?,
        xid: msg.xid,
    };
    header.write_bytes(&mut out[..OfpHeader::BYTE_LEN]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::action::Action;
    use crate::flow::{FlowMod, FlowModCommand, Match};
    use crate::message::PacketOut;
    use crate::{NO_BUFFER, OFPP_NONE};

    /// Reader that hands out at most `chunk` bytes per call
    struct Trickle {
        inner: Cursor<Vec<u8>>,
        chunk: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.chunk);
            self.inner.read(&mut buf[..n])
        }
    }

    #[test]
    fn echo_request_frame() {
        let bytes = encode(&Message::new(7, MessageBody::EchoRequest(vec![1, 2]))).unwrap();
        assert_eq!(bytes, vec![1, 2, 0, 10, 0, 0, 0, 7, 1, 2]);
    }

    #[test]
    fn short_reads_are_retried_until_the_body_is_drained() {
        let flow_mod = Message::new(
            42,
            MessageBody::FlowMod(FlowMod {
                pattern: Match::default().in_port(3),
                cookie: 0,
                command: FlowModCommand::Add,
                idle_timeout: 0,
                hard_timeout: 10,
                priority: 0xFFFF,
                buffer_id: NO_BUFFER,
                out_port: OFPP_NONE,
                flags: 0,
                actions: vec![Action::output(2)],
            }),
        );
        let mut stream = Trickle {
            inner: Cursor::new(encode(&flow_mod).unwrap()),
            chunk: 3,
        };
        assert_eq!(read_one(&mut stream).unwrap(), flow_mod);
        assert!(matches!(
            read_one(&mut stream),
            Err(CodecError::Disconnected)
        ));
    }

    #[test]
    fn consecutive_messages_are_framed_independently() {
        let mut bytes = encode(&Message::new(1, MessageBody::Hello)).unwrap();
        bytes.extend(encode(&Message::new(2, MessageBody::FeaturesRequest)).unwrap());
        let mut stream = Cursor::new(bytes);
        assert_eq!(read_one(&mut stream).unwrap().body, MessageBody::Hello);
        assert_eq!(read_one(&mut stream).unwrap().xid, 2);
    }

    #[test]
    fn close_mid_body_is_truncated() {
        let mut bytes = encode(&Message::new(1, MessageBody::EchoRequest(vec![0; 16]))).unwrap();
        bytes.truncate(12);
        let err = read_one(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Truncated {
                expected: 24,
                received: 12
            }
        ));
        assert!(!err.is_disconnect());
    }

    #[test]
    fn close_mid_header_is_truncated() {
        let err = read_one(&mut Cursor::new(vec![1, 0, 0])).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { received: 3, .. }));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut bytes = encode(&Message::new(1, MessageBody::Hello)).unwrap();
        bytes[0] = 4;
        assert!(matches!(
            read_one(&mut Cursor::new(bytes)),
            Err(CodecError::UnsupportedVersion(4))
        ));
    }

    #[test]
    fn length_shorter_than_header_is_rejected() {
        let bytes = vec![1, 0, 0, 4, 0, 0, 0, 0];
        assert!(matches!(
            read_one(&mut Cursor::new(bytes)),
            Err(CodecError::InvalidLength(4))
        ));
    }

    fn packet_out_with_data(len: usize) -> Message {
        Message::new(
            3,
            MessageBody::PacketOut(PacketOut {
                buffer_id: NO_BUFFER,
                in_port: OFPP_NONE,
                actions: Vec::new(),
                raw_data: vec![0xAB; len],
            }),
        )
    }

    #[test]
    fn largest_frame_fits_the_length_field() {
        // 8-byte header plus 8-byte packet-out fixed part
        let msg = packet_out_with_data(u16::MAX as usize - 16);
        let bytes = encode(&msg).unwrap();
        assert_eq!(bytes.len(), u16::MAX as usize);
        assert_eq!(&bytes[2..4], &[0xFF, 0xFF]);
        assert_eq!(read_one(&mut Cursor::new(bytes)).unwrap(), msg);
    }

    #[test]
    fn oversized_frame_is_refused() {
        let err = encode(&packet_out_with_data(70_000)).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Oversized {
                field: "message",
                len: 70_016,
                ..
            }
        ));

        let err = encode(&packet_out_with_data(u16::MAX as usize - 15)).unwrap_err();
        assert!(matches!(err, CodecError::Oversized { len: 65_536, .. }));
    }

    #[test]
    fn oversized_action_is_refused() {
        let action = Action::Unknown {
            action_type: 0xFFFF,
            payload: vec![0; u16::MAX as usize],
        };
        let msg = Message::new(
            1,
            MessageBody::PacketOut(PacketOut {
                buffer_id: NO_BUFFER,
                in_port: OFPP_NONE,
                actions: vec![action],
                raw_data: Vec::new(),
            }),
        );
        assert!(matches!(
            encode(&msg),
            Err(CodecError::Oversized { field: "action", .. })
        ));
    }

    #[test]
    fn reset_is_a_disconnect() {
        let err = CodecError::Io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(err.is_disconnect());
        assert!(CodecError::Disconnected.is_disconnect());
        assert!(!CodecError::InvalidLength(0).is_disconnect());
    }
}
