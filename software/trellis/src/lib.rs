//! Controller runtime for OpenFlow 1.0 switches.
//!
//! Switches connect over TCP, complete the Hello/Echo/Features handshake, and
//! are then registered by datapath id. Their messages are routed to the
//! application's [`Handler`], which runs under a single controller-wide lock
//! alongside any timers registered on the [`Controller`].

pub mod builders;
pub mod controller;
mod dispatcher;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod logging;
pub mod registry;
pub mod timer;

pub use builders::{
    build_flow_mod_add, build_flow_mod_delete, build_flow_mod_modify, build_packet_out,
    FlowModOptions, PacketOutOptions,
};
pub use controller::{Controller, ControllerConfig, ControllerHandle, FailurePolicy};
pub use error::{Error, HandlerError, HandlerResult, Result};
pub use handler::Handler;
pub use logging::init_logging;
pub use registry::SwitchRegistry;

/// Wire formats and codec, re-exported for handlers
pub use trellis_shared;
