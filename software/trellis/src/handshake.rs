//! Hello → Echo → Features exchange that turns an accepted connection
//! into an identified switch.
//!
//! ```text
//! Start --send Hello, recv Hello--> HelloSent
//!       --send EchoRequest, recv EchoReply--> EchoExchanged
//!       --send FeaturesRequest, recv FeaturesReply--> FeaturesExchanged
//!       --identity known--> Ready
//! ```
//! Any failure moves to `Failed` and aborts only this connection.

use std::io::{Read, Write};

use tracing::debug;

use trellis_shared::{encode, read_one, FeaturesReply, Message, MessageBody, MessageType};

use crate::error::{Error, Result};

/// Progress of one connection through the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    Start,
    /// Our Hello is out; waiting for the peer's
    HelloSent,
    /// Echo round trip done; features not yet known
    EchoExchanged,
    /// Features reply received, so the datapath id is known
    FeaturesExchanged,
    Ready,
    Failed,
}

/// Drives a single stream through the handshake.
pub struct Handshake<'a, S> {
    stream: &'a mut S,
    state: HandshakeState,
}

impl<'a, S: Read + Write> Handshake<'a, S> {
    pub fn new(stream: &'a mut S) -> Self {
        Self {
            stream,
            state: HandshakeState::Start,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run the exchange to completion, returning the switch's features.
    pub fn run(&mut self) -> Result<FeaturesReply> {
        let result = self.exchange();
        if result.is_err() {
            self.state = HandshakeState::Failed;
        }
        result
    }

    fn exchange(&mut self) -> Result<FeaturesReply> {
        // Hello: the peer's first message must be a Hello
        self.send(MessageBody::Hello)?;
        self.state = HandshakeState::HelloSent;
        let first = self.recv()?;
        if first.body != MessageBody::Hello {
            return Err(self.failure(format!(
                "expected Hello, received {:?}",
                first.message_type()
            )));
        }

        // Echo
        self.send(MessageBody::EchoRequest(Vec::new()))?;
        self.await_reply(MessageType::EchoReply)?;
        self.state = HandshakeState::EchoExchanged;

        // Features
        self.send(MessageBody::FeaturesRequest)?;
        let features = match self.await_reply(MessageType::FeaturesReply)?.body {
            MessageBody::FeaturesReply(features) => features,
            other => {
                return Err(self.failure(format!(
                    "expected FeaturesReply, received {:?}",
                    other.message_type()
                )))
            }
        };
        self.state = HandshakeState::FeaturesExchanged;
        debug!(
            "Handshake obtained features of switch {:#018x}",
            features.datapath_id
        );

        self.state = HandshakeState::Ready;
        Ok(features)
    }

    fn failure(&self, reason: String) -> Error {
        Error::HandshakeFailure {
            state: self.state,
            reason,
        }
    }

    fn send(&mut self, body: MessageBody) -> Result<()> {
        self.write(&Message::new(rand::random(), body))
    }

    fn write(&mut self, msg: &Message) -> Result<()> {
        let bytes = encode(msg)
            .map_err(|e| self.failure(format!("unable to encode {:?}: {e}", msg.message_type())))?;
        self.stream
            .write_all(&bytes)
            .and_then(|_| self.stream.flush())
            .map_err(|e| self.failure(format!("unable to send {:?}: {e}", msg.message_type())))
    }

    fn recv(&mut self) -> Result<Message> {
        read_one(&mut *self.stream).map_err(|e| self.failure(e.to_string()))
    }

    /// Read until a message of kind `wanted` arrives.
    ///
    /// Echo requests from the peer are answered in place; asynchronous
    /// switch events are dropped because the switch has no identity yet.
    fn await_reply(&mut self, wanted: MessageType) -> Result<Message> {
        loop {
            let msg = self.recv()?;
            if msg.message_type() == wanted {
                return Ok(msg);
            }
            match msg.body {
                MessageBody::EchoRequest(data) => {
                    self.write(&Message::new(msg.xid, MessageBody::EchoReply(data)))?;
                }
                MessageBody::PacketIn(_)
                | MessageBody::FlowRemoved(_)
                | MessageBody::PortStatus(_) => {
                    debug!(
                        "Discarding {:?} received during handshake",
                        msg.body.message_type()
                    );
                }
                other => {
                    return Err(self.failure(format!(
                        "expected {wanted:?}, received {:?}",
                        other.message_type()
                    )))
                }
            }
        }
    }
}
