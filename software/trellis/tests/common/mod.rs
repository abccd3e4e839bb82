//! Fake switches and a recording handler for end-to-end tests.
#![allow(dead_code)]

use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use trellis::trellis_shared::{
    encode, read_one, CodecError, DatapathId, FeaturesReply, Message, MessageBody, PacketIn,
};
use trellis::{Controller, ControllerConfig, ControllerHandle, FailurePolicy, Handler, HandlerResult};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Loopback, ephemeral port, and failures contained to the offending connection
pub fn test_config() -> ControllerConfig {
    ControllerConfig::default()
        .with_bind_address(Ipv4Addr::LOCALHOST.into())
        .with_port(0)
        .with_protocol_violation(FailurePolicy::Isolate)
        .with_handler_fault(FailurePolicy::Isolate)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Start(Vec<String>),
    Ready(DatapathId),
    Disconnected(DatapathId),
    PacketIn(DatapathId, Option<DatapathId>),
    Barrier(DatapathId, u32),
}

/// Handler that appends every event it sees to a shared log
#[derive(Clone, Default)]
pub struct Recorder {
    pub events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Handler for Recorder {
    fn start(&mut self, _ctl: &ControllerHandle, args: &[String]) -> HandlerResult {
        self.push(Event::Start(args.to_vec()));
        Ok(())
    }

    fn switch_ready(&mut self, _ctl: &ControllerHandle, datapath_id: DatapathId) -> HandlerResult {
        self.push(Event::Ready(datapath_id));
        Ok(())
    }

    fn switch_disconnected(
        &mut self,
        _ctl: &ControllerHandle,
        datapath_id: DatapathId,
    ) -> HandlerResult {
        self.push(Event::Disconnected(datapath_id));
        Ok(())
    }

    fn packet_in(
        &mut self,
        _ctl: &ControllerHandle,
        datapath_id: DatapathId,
        msg: &PacketIn,
    ) -> HandlerResult {
        self.push(Event::PacketIn(datapath_id, msg.datapath_id));
        Ok(())
    }

    fn barrier_reply(
        &mut self,
        _ctl: &ControllerHandle,
        datapath_id: DatapathId,
        xid: u32,
    ) -> HandlerResult {
        self.push(Event::Barrier(datapath_id, xid));
        Ok(())
    }
}

/// A controller running on its own thread
pub struct Running {
    pub ctl: ControllerHandle,
    pub addr: SocketAddr,
    pub thread: JoinHandle<trellis::Result<()>>,
}

impl Running {
    /// Stop the controller and return the result of its run
    pub fn finish(self) -> trellis::Result<()> {
        self.ctl.stop();
        self.thread.join().unwrap()
    }
}

pub fn spawn<H: Handler>(controller: Controller<H>, args: Vec<String>) -> Running {
    let ctl = controller.handle();
    let mut controller = controller;
    let thread = thread::spawn(move || controller.run(&args));
    let addr = ctl
        .wait_listening(TIMEOUT)
        .expect("controller did not start listening");
    Running { ctl, addr, thread }
}

/// Poll `condition` until it holds or the timeout passes
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// The switch side of a connection
pub struct FakeSwitch {
    pub stream: TcpStream,
}

impl FakeSwitch {
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        Self { stream }
    }

    /// Connect and complete the handshake as a well-behaved switch
    pub fn handshake(addr: SocketAddr, datapath_id: DatapathId) -> Self {
        let mut switch = Self::connect(addr);

        let hello = switch.recv().unwrap();
        assert_eq!(hello.body, MessageBody::Hello);
        switch.send(&Message::new(hello.xid, MessageBody::Hello));

        let echo = switch.recv().unwrap();
        assert!(matches!(echo.body, MessageBody::EchoRequest(_)));
        switch.send(&Message::new(echo.xid, MessageBody::EchoReply(Vec::new())));

        let request = switch.recv().unwrap();
        assert_eq!(request.body, MessageBody::FeaturesRequest);
        switch.send(&Message::new(
            request.xid,
            MessageBody::FeaturesReply(FeaturesReply {
                datapath_id,
                n_buffers: 256,
                n_tables: 1,
                ..Default::default()
            }),
        ));
        switch
    }

    pub fn send(&mut self, msg: &Message) {
        self.stream.write_all(&encode(msg).unwrap()).unwrap();
    }

    pub fn recv(&mut self) -> Result<Message, CodecError> {
        read_one(&mut self.stream)
    }

    /// Whether the controller has closed this connection
    pub fn is_closed_by_peer(&mut self) -> bool {
        match self.recv() {
            Err(e) => e.is_disconnect(),
            Ok(_) => false,
        }
    }
}
