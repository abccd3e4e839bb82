//! MAC-learning switch.
//!
//! Learns which port each source address arrives on, installs a flow for
//! known destinations, and floods the rest. Learned entries age out.
//!
//! Run with `cargo run --example learning_switch [config.json]`.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::info;

use trellis::trellis_shared::port::OFPP_FLOOD;
use trellis::trellis_shared::{Action, DatapathId, MacAddr, Match, PacketIn};
use trellis::{
    init_logging, Controller, ControllerConfig, ControllerHandle, FlowModOptions, Handler,
    HandlerResult, PacketOutOptions,
};

const ENTRY_LIFETIME: Duration = Duration::from_secs(60);
const FLOW_IDLE_TIMEOUT_S: u16 = 30;

#[derive(Default)]
struct LearningSwitch {
    /// Per switch: address -> (port, last seen)
    tables: BTreeMap<DatapathId, BTreeMap<MacAddr, (u16, Instant)>>,
}

impl LearningSwitch {
    fn age_out(&mut self) {
        let now = Instant::now();
        for table in self.tables.values_mut() {
            table.retain(|_, (_, seen)| now.duration_since(*seen) < ENTRY_LIFETIME);
        }
    }
}

impl Handler for LearningSwitch {
    fn start(&mut self, _ctl: &ControllerHandle, args: &[String]) -> HandlerResult {
        info!("Learning switch started with args {args:?}");
        Ok(())
    }

    fn switch_ready(&mut self, _ctl: &ControllerHandle, datapath_id: DatapathId) -> HandlerResult {
        self.tables.insert(datapath_id, BTreeMap::new());
        Ok(())
    }

    fn switch_disconnected(
        &mut self,
        _ctl: &ControllerHandle,
        datapath_id: DatapathId,
    ) -> HandlerResult {
        self.tables.remove(&datapath_id);
        Ok(())
    }

    fn packet_in(
        &mut self,
        ctl: &ControllerHandle,
        datapath_id: DatapathId,
        msg: &PacketIn,
    ) -> HandlerResult {
        let (Some(src), Some(dst)) = (msg.source_mac(), msg.destination_mac()) else {
            return Ok(());
        };
        let table = self.tables.entry(datapath_id).or_default();
        table.insert(src, (msg.in_port, Instant::now()));

        match table.get(&dst) {
            Some(&(port, _)) if port != msg.in_port => {
                let pattern = Match::default().in_port(msg.in_port).dl_dst(dst);
                let options = FlowModOptions::new(pattern)
                    .actions(vec![Action::output(port)])
                    .idle_timeout(FLOW_IDLE_TIMEOUT_S)
                    .buffer_id(msg.buffer_id);
                ctl.send_flow_mod_add(datapath_id, &options)?;
                // A buffered packet is released by the flow mod itself
                if msg.buffer_id == trellis::trellis_shared::NO_BUFFER {
                    let out = PacketOutOptions::replay(msg, vec![Action::output(port)]);
                    ctl.send_packet_out(datapath_id, &out)?;
                }
            }
            Some(_) => {} // Destination is on the ingress port; drop
            None => {
                let out = PacketOutOptions::replay(msg, vec![Action::output(OFPP_FLOOD)]);
                ctl.send_packet_out(datapath_id, &out)?;
            }
        }
        Ok(())
    }
}

fn main() -> trellis::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match args.first() {
        Some(path) => ControllerConfig::load(Path::new(path))?,
        None => ControllerConfig::default(),
    };
    init_logging(&config)?;

    let mut controller = Controller::new(LearningSwitch::default(), config);
    controller.add_timer_event("age_out", Duration::from_secs(10), |switch, _ctl| {
        switch.age_out();
        Ok(())
    })?;

    controller.run(&args)
}
