//! Settings for a controller run
//! that may be loaded from a JSON file.

use std::default::Default;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use trellis_shared::DEFAULT_PORT;

/// What to do when a switch violates the protocol or a handler fails.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log the failure and exit the process with a non-zero status
    #[default]
    Abort,

    /// Stop the controller and return the failure from `Controller::run`
    Shutdown,

    /// Contain the failure: drop only the offending connection,
    /// or log a failed handler and carry on
    Isolate,
}

/// Controller settings.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
#[non_exhaustive]
pub struct ControllerConfig {
    /// Address to listen on
    pub bind_address: IpAddr,

    /// TCP port to listen on; 0 picks an ephemeral port
    pub port: u16,

    /// How long the accept loop sleeps between polls for new connections
    /// and for a stop request
    pub accept_poll_ms: u64,

    /// Response to unrecognized messages from an established switch
    pub protocol_violation: FailurePolicy,

    /// Response to an error or panic escaping a handler or timer callback
    pub handler_fault: FailurePolicy,

    /// A name for this controller run, used to name its log file
    pub op_name: String,

    /// Directory for log files; no file logging if unset
    pub log_dir: Option<PathBuf>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        // Use current time with seconds as op name,
        // replacing characters in the name that would be invalid on Windows.
        let op_name = DateTime::<Utc>::from(SystemTime::now())
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            .replace(":", "");
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            accept_poll_ms: 50,
            protocol_violation: FailurePolicy::Abort,
            handler_fault: FailurePolicy::Abort,
            op_name,
            log_dir: None,
        }
    }
}

impl ControllerConfig {
    /// Read settings from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("unable to read {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("unable to parse {}: {e}", path.display())))
    }

    /// Listen on `port` instead of the default
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind_address(mut self, addr: IpAddr) -> Self {
        self.bind_address = addr;
        self
    }

    pub fn with_protocol_violation(mut self, policy: FailurePolicy) -> Self {
        self.protocol_violation = policy;
        self
    }

    pub fn with_handler_fault(mut self, policy: FailurePolicy) -> Self {
        self.handler_fault = policy;
        self
    }

    pub fn with_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.log_dir = dir;
        self
    }

    /// Socket address of the listening endpoint
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub(crate) fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms.max(1))
    }
}
