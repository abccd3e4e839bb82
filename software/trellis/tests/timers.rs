mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::*;
use trellis::trellis_shared::{DatapathId, Message, MessageBody, PacketIn, PacketInReason, NO_BUFFER};
use trellis::{Controller, ControllerHandle, Handler, HandlerResult};

/// Detects any two handler bodies running at the same time
#[derive(Clone, Default)]
struct Exclusive {
    active: Arc<AtomicUsize>,
    overlapped: Arc<AtomicBool>,
    ticks_a: Arc<AtomicUsize>,
    ticks_b: Arc<AtomicUsize>,
    oneshots: Arc<AtomicUsize>,
    packets: Arc<AtomicUsize>,
}

impl Exclusive {
    fn critical_section(&self, counter: &AtomicUsize) {
        if self.active.fetch_add(1, Ordering::SeqCst) != 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        thread::sleep(Duration::from_micros(200));
        counter.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Handler for Exclusive {
    fn packet_in(&mut self, _: &ControllerHandle, _: DatapathId, _: &PacketIn) -> HandlerResult {
        let packets = self.packets.clone();
        self.critical_section(&packets);
        Ok(())
    }
}

#[test]
fn timers_and_handlers_never_overlap() {
    let state = Exclusive::default();
    let mut controller = Controller::new(state.clone(), test_config());
    controller
        .add_timer_event("a", Duration::from_millis(1), |h: &mut Exclusive, _| {
            let ticks = h.ticks_a.clone();
            h.critical_section(&ticks);
            Ok(())
        })
        .unwrap();
    controller
        .add_timer_event("b", Duration::from_millis(1), |h: &mut Exclusive, _| {
            let ticks = h.ticks_b.clone();
            h.critical_section(&ticks);
            Ok(())
        })
        .unwrap();
    controller
        .add_oneshot_timer_event("once", Duration::from_millis(5), |h: &mut Exclusive, _| {
            let oneshots = h.oneshots.clone();
            h.critical_section(&oneshots);
            Ok(())
        })
        .unwrap();
    let running = spawn(controller, vec![]);

    let mut switch = FakeSwitch::handshake(running.addr, 1);
    for _ in 0..20 {
        switch.send(&Message::new(
            0,
            MessageBody::PacketIn(PacketIn {
                datapath_id: None,
                buffer_id: NO_BUFFER,
                total_len: 0,
                in_port: 1,
                reason: PacketInReason::NoMatch,
                raw_data: Vec::new(),
            }),
        ));
    }

    assert!(wait_for(|| {
        state.packets.load(Ordering::SeqCst) == 20
            && state.ticks_a.load(Ordering::SeqCst) >= 5
            && state.ticks_b.load(Ordering::SeqCst) >= 5
    }));
    running.finish().unwrap();

    assert!(!state.overlapped.load(Ordering::SeqCst));
    assert_eq!(state.oneshots.load(Ordering::SeqCst), 1);

    // Nothing fires after stop returns
    let a = state.ticks_a.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(state.ticks_a.load(Ordering::SeqCst), a);
}

#[test]
fn timer_can_command_switches() {
    let state = Exclusive::default();
    let mut controller = Controller::new(state, test_config());
    controller
        .add_timer_event("barrier", Duration::from_millis(5), |_, ctl| {
            for dpid in ctl.switches().datapath_ids() {
                ctl.send_message(dpid, &Message::new(77, MessageBody::BarrierRequest));
            }
            Ok(())
        })
        .unwrap();
    let running = spawn(controller, vec![]);

    let mut switch = FakeSwitch::handshake(running.addr, 9);
    assert_eq!(
        switch.recv().unwrap(),
        Message::new(77, MessageBody::BarrierRequest)
    );

    running.finish().unwrap();
}
