//! Normalize caller-supplied options into complete outbound command messages.
//!
//! The builders are pure: they apply defaults and check mandatory fields,
//! but never touch a connection.

use trellis_shared::flow::OFPFF_SEND_FLOW_REM;
use trellis_shared::{
    Action, FlowMod, FlowModCommand, Match, Message, MessageBody, PacketIn, PacketOut, NO_BUFFER,
    OFPP_NONE,
};

use crate::error::{Error, Result};

/// Priority given to flow entries when the caller does not choose one
pub const DEFAULT_PRIORITY: u16 = 0xFFFF;

/// Options for adding, modifying, or deleting flow entries.
///
/// Only `pattern` is mandatory.
#[derive(Clone, Debug, Default)]
pub struct FlowModOptions {
    /// Defaults to a random transaction id
    pub transaction_id: Option<u32>,
    pub pattern: Option<Match>,
    /// Ignored by deletes
    pub actions: Vec<Action>,
    /// Defaults to 0 (never expire on idle)
    pub idle_timeout: Option<u16>,
    /// Defaults to 0 (never expire)
    pub hard_timeout: Option<u16>,
    /// Defaults to [`DEFAULT_PRIORITY`]
    pub priority: Option<u16>,
    /// Defaults to 0
    pub cookie: Option<u64>,
    /// Buffered packet to apply the new entry to; defaults to [`NO_BUFFER`]
    pub buffer_id: Option<u32>,
    /// Restricts deletes to entries outputting to this port; defaults to [`OFPP_NONE`]
    pub out_port: Option<u16>,
    /// Ask the switch to report when the entry is removed
    pub send_flow_removed: bool,
}

impl FlowModOptions {
    /// Options matching `pattern`, with every other field defaulted
    pub fn new(pattern: Match) -> Self {
        Self {
            pattern: Some(pattern),
            ..Default::default()
        }
    }

    pub fn actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }

    pub fn transaction_id(mut self, xid: u32) -> Self {
        self.transaction_id = Some(xid);
        self
    }

    pub fn idle_timeout(mut self, secs: u16) -> Self {
        self.idle_timeout = Some(secs);
        self
    }

    pub fn hard_timeout(mut self, secs: u16) -> Self {
        self.hard_timeout = Some(secs);
        self
    }

    pub fn priority(mut self, priority: u16) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn buffer_id(mut self, buffer_id: u32) -> Self {
        self.buffer_id = Some(buffer_id);
        self
    }

    pub fn out_port(mut self, port: u16) -> Self {
        self.out_port = Some(port);
        self
    }

    pub fn send_flow_removed(mut self, enabled: bool) -> Self {
        self.send_flow_removed = enabled;
        self
    }
}

/// Options for emitting a packet from a switch.
///
/// Either `packet_in` (replay a received packet) or `raw_data`
/// (inject bytes) must be provided. When both are, the packet-in wins.
#[derive(Clone, Debug, Default)]
pub struct PacketOutOptions {
    /// Defaults to a random transaction id
    pub transaction_id: Option<u32>,
    /// Received packet whose ingress port and bytes are replayed
    pub packet_in: Option<PacketIn>,
    /// Packet bytes to inject
    pub raw_data: Option<Vec<u8>>,
    /// Ingress port to report for injected packets; defaults to [`OFPP_NONE`]
    pub in_port: Option<u16>,
    pub actions: Vec<Action>,
}

impl PacketOutOptions {
    /// Replay a previously received packet
    pub fn replay(packet_in: &PacketIn, actions: Vec<Action>) -> Self {
        Self {
            packet_in: Some(packet_in.clone()),
            actions,
            ..Default::default()
        }
    }

    /// Inject raw packet bytes
    pub fn raw(raw_data: Vec<u8>, actions: Vec<Action>) -> Self {
        Self {
            raw_data: Some(raw_data),
            actions,
            ..Default::default()
        }
    }

    pub fn transaction_id(mut self, xid: u32) -> Self {
        self.transaction_id = Some(xid);
        self
    }
}

fn xid_or_random(xid: Option<u32>) -> u32 {
    xid.unwrap_or_else(rand::random)
}

fn build_flow_mod(command: FlowModCommand, options: &FlowModOptions) -> Result<Message> {
    let pattern = options.pattern.ok_or(Error::MissingOption("match"))?;
    let flags = if options.send_flow_removed {
        OFPFF_SEND_FLOW_REM
    } else {
        0
    };

    let flow_mod = match command {
        FlowModCommand::Delete | FlowModCommand::DeleteStrict => FlowMod {
            pattern,
            cookie: options.cookie.unwrap_or(0),
            command,
            idle_timeout: 0,
            hard_timeout: 0,
            priority: options.priority.unwrap_or(DEFAULT_PRIORITY),
            buffer_id: NO_BUFFER,
            out_port: options.out_port.unwrap_or(OFPP_NONE),
            flags,
            actions: Vec::new(),
        },
        _ => FlowMod {
            pattern,
            cookie: options.cookie.unwrap_or(0),
            command,
            idle_timeout: options.idle_timeout.unwrap_or(0),
            hard_timeout: options.hard_timeout.unwrap_or(0),
            priority: options.priority.unwrap_or(DEFAULT_PRIORITY),
            buffer_id: options.buffer_id.unwrap_or(NO_BUFFER),
            out_port: OFPP_NONE,
            flags,
            actions: options.actions.clone(),
        },
    };

    Ok(Message::new(
        xid_or_random(options.transaction_id),
        MessageBody::FlowMod(flow_mod),
    ))
}

/// Flow-mod that installs a new entry
pub fn build_flow_mod_add(options: &FlowModOptions) -> Result<Message> {
    build_flow_mod(FlowModCommand::Add, options)
}

/// Flow-mod that changes the actions of existing entries
pub fn build_flow_mod_modify(options: &FlowModOptions) -> Result<Message> {
    build_flow_mod(FlowModCommand::Modify, options)
}

/// Flow-mod that removes every entry covered by the match
pub fn build_flow_mod_delete(options: &FlowModOptions) -> Result<Message> {
    build_flow_mod(FlowModCommand::Delete, options)
}

/// Packet-out that replays a packet-in or injects raw bytes
pub fn build_packet_out(options: &PacketOutOptions) -> Result<Message> {
    let (in_port, raw_data) = match (&options.packet_in, &options.raw_data) {
        (Some(packet_in), _) => (packet_in.in_port, packet_in.raw_data.clone()),
        (None, Some(raw_data)) => (options.in_port.unwrap_or(OFPP_NONE), raw_data.clone()),
        (None, None) => return Err(Error::MissingOption("packet_in or raw_data")),
    };

    Ok(Message::new(
        xid_or_random(options.transaction_id),
        MessageBody::PacketOut(PacketOut {
            buffer_id: NO_BUFFER,
            in_port,
            actions: options.actions.clone(),
            raw_data,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_shared::PacketInReason;

    fn flow_mod(msg: &Message) -> &FlowMod {
        match &msg.body {
            MessageBody::FlowMod(f) => f,
            other => panic!("expected flow mod, got {other:?}"),
        }
    }

    #[test]
    fn delete_defaults() {
        let pattern = Match::default().in_port(4);
        let msg = build_flow_mod_delete(&FlowModOptions::new(pattern)).unwrap();
        let f = flow_mod(&msg);
        assert_eq!(f.command, FlowModCommand::Delete);
        assert_eq!(f.buffer_id, 0xFFFF_FFFF);
        assert_eq!(f.out_port, 0xFFFF);
        assert_eq!(f.pattern, pattern);
        assert!(f.actions.is_empty());
    }

    #[test]
    fn delete_ignores_actions_and_keeps_out_port() {
        let options = FlowModOptions::new(Match::default())
            .actions(vec![Action::output(1)])
            .out_port(3);
        let msg = build_flow_mod_delete(&options).unwrap();
        assert!(flow_mod(&msg).actions.is_empty());
        assert_eq!(flow_mod(&msg).out_port, 3);
    }

    #[test]
    fn add_defaults() {
        let options = FlowModOptions::new(Match::default()).actions(vec![Action::output(2)]);
        let msg = build_flow_mod_add(&options).unwrap();
        let f = flow_mod(&msg);
        assert_eq!(f.command, FlowModCommand::Add);
        assert_eq!(f.hard_timeout, 0);
        assert_eq!(f.idle_timeout, 0);
        assert_eq!(f.buffer_id, NO_BUFFER);
        assert_eq!(f.priority, DEFAULT_PRIORITY);
        assert_eq!(f.flags, 0);
        assert_eq!(f.actions, vec![Action::output(2)]);
    }

    #[test]
    fn add_honors_caller_values() {
        let options = FlowModOptions::new(Match::default())
            .transaction_id(99)
            .hard_timeout(30)
            .buffer_id(12)
            .send_flow_removed(true);
        let msg = build_flow_mod_add(&options).unwrap();
        assert_eq!(msg.xid, 99);
        let f = flow_mod(&msg);
        assert_eq!(f.hard_timeout, 30);
        assert_eq!(f.buffer_id, 12);
        assert_eq!(f.flags, OFPFF_SEND_FLOW_REM);
    }

    #[test]
    fn modify_uses_modify_command() {
        let msg = build_flow_mod_modify(&FlowModOptions::new(Match::default())).unwrap();
        assert_eq!(flow_mod(&msg).command, FlowModCommand::Modify);
    }

    #[test]
    fn flow_mod_without_match_is_rejected() {
        let err = build_flow_mod_add(&FlowModOptions::default()).unwrap_err();
        assert!(matches!(err, Error::MissingOption("match")));
        assert!(build_flow_mod_delete(&FlowModOptions::default()).is_err());
    }

    #[test]
    fn packet_out_replays_packet_in() {
        let packet_in = PacketIn {
            datapath_id: Some(1),
            buffer_id: 33,
            total_len: 3,
            in_port: 5,
            reason: PacketInReason::NoMatch,
            raw_data: vec![1, 2, 3],
        };
        let actions = vec![Action::output(7)];
        let msg = build_packet_out(&PacketOutOptions::replay(&packet_in, actions.clone())).unwrap();
        match msg.body {
            MessageBody::PacketOut(p) => {
                assert_eq!(p.in_port, 5);
                assert_eq!(p.raw_data, vec![1, 2, 3]);
                assert_eq!(p.actions, actions);
                assert_eq!(p.buffer_id, NO_BUFFER);
            }
            other => panic!("expected packet out, got {other:?}"),
        }
    }

    #[test]
    fn packet_out_injects_raw_data() {
        let msg = build_packet_out(&PacketOutOptions::raw(vec![0xAA], vec![]).transaction_id(5))
            .unwrap();
        assert_eq!(msg.xid, 5);
        match msg.body {
            MessageBody::PacketOut(p) => {
                assert_eq!(p.in_port, OFPP_NONE);
                assert_eq!(p.raw_data, vec![0xAA]);
                assert_eq!(p.buffer_id, NO_BUFFER);
            }
            other => panic!("expected packet out, got {other:?}"),
        }
    }

    #[test]
    fn packet_out_needs_a_payload_source() {
        let err = build_packet_out(&PacketOutOptions::default()).unwrap_err();
        assert!(matches!(err, Error::MissingOption(_)));
    }
}
