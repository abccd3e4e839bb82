//! Map of connected switches, keyed by datapath identifier.

use std::collections::BTreeMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use trellis_shared::{encode, CodecError, DatapathId, Message};

use crate::error::{Error, Result};

/// Identifier of one accepted connection, unique within a controller run
pub type ConnectionId = u64;

/// Writable half of a switch connection.
pub type SwitchWriter = Box<dyn Write + Send>;

/// Handle for writing to one live switch connection.
#[derive(Clone)]
pub struct SwitchConnection {
    conn_id: ConnectionId,
    peer: Option<SocketAddr>,
    writer: Arc<Mutex<SwitchWriter>>,
}

impl SwitchConnection {
    pub fn new(conn_id: ConnectionId, peer: Option<SocketAddr>, writer: SwitchWriter) -> Self {
        Self {
            conn_id,
            peer,
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Encode and write one message, flushing it to the switch.
    ///
    /// A message that cannot be framed is refused before anything is written.
    pub fn write_message(&self, msg: &Message) -> std::result::Result<(), CodecError> {
        let bytes = encode(msg)?;
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for SwitchConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchConnection")
            .field("conn_id", &self.conn_id)
            .field("peer", &self.peer)
            .finish()
    }
}

/// Concurrent map from datapath identifier to its live connection.
///
/// This is the single source of truth for whether a switch is connected.
/// Cloning yields another handle to the same map.
#[derive(Clone, Default, Debug)]
pub struct SwitchRegistry {
    switches: Arc<RwLock<BTreeMap<DatapathId, SwitchConnection>>>,
}

impl SwitchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<DatapathId, SwitchConnection>> {
        self.switches
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<DatapathId, SwitchConnection>> {
        self.switches
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a connection, replacing and returning any previous connection
    /// for the same datapath id.
    ///
    /// The replaced connection is not closed; it stays open but can no
    /// longer be reached through the registry.
    pub fn put(&self, datapath_id: DatapathId, conn: SwitchConnection) -> Option<SwitchConnection> {
        let previous = self.write().insert(datapath_id, conn);
        if let Some(prev) = &previous {
            warn!(
                "Switch {datapath_id:#018x} re-registered; connection {} is no longer reachable",
                prev.conn_id
            );
        }
        previous
    }

    pub fn get(&self, datapath_id: DatapathId) -> Option<SwitchConnection> {
        self.read().get(&datapath_id).cloned()
    }

    pub fn contains(&self, datapath_id: DatapathId) -> bool {
        self.read().contains_key(&datapath_id)
    }

    /// Remove a switch regardless of which connection registered it
    pub fn delete(&self, datapath_id: DatapathId) -> Option<SwitchConnection> {
        self.write().remove(&datapath_id)
    }

    /// Remove a switch only if it is still registered to `conn_id`,
    /// so that a replaced connection going away does not unregister its successor.
    pub fn delete_connection(&self, datapath_id: DatapathId, conn_id: ConnectionId) -> bool {
        let mut switches = self.write();
        match switches.get(&datapath_id) {
            Some(conn) if conn.conn_id == conn_id => {
                switches.remove(&datapath_id);
                true
            }
            _ => false,
        }
    }

    /// Datapath ids of every connected switch, in ascending order
    pub fn datapath_ids(&self) -> Vec<DatapathId> {
        self.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub(crate) fn clear(&self) {
        self.write().clear();
    }

    /// Write a message to a connected switch.
    ///
    /// The map lock is released before writing so a slow switch
    /// does not block registration of others.
    pub fn send(&self, datapath_id: DatapathId, msg: &Message) -> Result<()> {
        let conn = self.get(datapath_id).ok_or_else(|| Error::SendFailure {
            datapath_id,
            reason: "switch not connected".to_owned(),
        })?;
        conn.write_message(msg).map_err(|e| Error::SendFailure {
            datapath_id,
            reason: e.to_string(),
        })?;
        debug!(
            "Sent {:?} (xid {}) to switch {datapath_id:#018x}",
            msg.message_type(),
            msg.xid
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Writer whose bytes can be inspected after being handed to a connection
    #[derive(Clone, Default)]
    pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        pub fn bytes(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }

        /// Decode every message written so far
        pub fn messages(&self) -> Vec<Message> {
            let bytes = self.bytes();
            let mut cursor = std::io::Cursor::new(bytes);
            let mut out = Vec::new();
            while let Ok(msg) = trellis_shared::read_one(&mut cursor) {
                out.push(msg);
            }
            out
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Writer that always fails, like a socket whose peer has reset
    pub struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    pub fn connection(conn_id: ConnectionId) -> (SwitchConnection, SharedBuf) {
        let buf = SharedBuf::default();
        (
            SwitchConnection::new(conn_id, None, Box::new(buf.clone())),
            buf,
        )
    }
}
