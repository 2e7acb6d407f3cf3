//! Connection registry: the one shared table of live links.
//!
//! A single lock guards the map and the identity counter. It is held only
//! for map access; every socket operation happens after the lock is gone,
//! against a cloned writer handle.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::Mutex;

use peerchat_core::wire::MAX_CONNECTIONS;

use crate::connection::{
    CloseSignal, ConnectionId, ConnectionInfo, ConnectionRecord, Direction, SharedWriter,
};
use crate::error::AdmissionError;

struct Table {
    records: BTreeMap<ConnectionId, ConnectionRecord>,
    /// Last identity handed out. Identities start at 1.
    last_id: ConnectionId,
}

impl Table {
    fn check_admission(
        &self,
        capacity: usize,
        ip: IpAddr,
        port: Option<u16>,
    ) -> Result<(), AdmissionError> {
        if self.records.len() >= capacity {
            return Err(AdmissionError::CapacityExceeded { limit: capacity });
        }
        if self.is_duplicate(ip, port) {
            return Err(AdmissionError::DuplicateConnection { ip, port });
        }
        Ok(())
    }

    fn is_duplicate(&self, ip: IpAddr, port: Option<u16>) -> bool {
        self.records.values().any(|record| {
            let info = record.info();
            info.ip == ip && port.map_or(true, |p| info.port == p)
        })
    }
}

/// A freshly registered link: its snapshot and the reader's close signal.
pub struct Registered {
    pub info: ConnectionInfo,
    pub close: CloseSignal,
}

/// Shared handle to the table. Cloning is cheap.
#[derive(Clone)]
pub struct ConnectionRegistry {
    table: Arc<Mutex<Table>>,
    capacity: usize,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CONNECTIONS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            table: Arc::new(Mutex::new(Table {
                records: BTreeMap::new(),
                last_id: 0,
            })),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admit and insert a link, assigning the next identity.
    ///
    /// Capacity and duplicates are re-checked under the same lock as the
    /// insert. Incoming links collide on IP alone, outgoing ones on IP and
    /// port. The caller keeps its writer clone so it can still refuse the
    /// peer on error.
    pub async fn register(
        &self,
        ip: IpAddr,
        port: u16,
        direction: Direction,
        writer: SharedWriter,
    ) -> Result<Registered, AdmissionError> {
        let duplicate_port = match direction {
            Direction::Incoming => None,
            Direction::Outgoing => Some(port),
        };

        let mut table = self.table.lock().await;
        table.check_admission(self.capacity, ip, duplicate_port)?;

        table.last_id += 1;
        let info = ConnectionInfo {
            id: table.last_id,
            ip,
            port,
            direction,
        };
        let (record, close) = ConnectionRecord::new(info.clone(), writer);
        table.records.insert(info.id, record);

        tracing::debug!(conn_id = info.id, peer = %info, %direction, "connection registered");
        Ok(Registered { info, close })
    }

    pub async fn lookup(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let table = self.table.lock().await;
        table.records.get(&id).map(|r| r.info().clone())
    }

    /// Snapshot plus a writer clone, for sending outside the lock.
    pub async fn writer(&self, id: ConnectionId) -> Option<(ConnectionInfo, SharedWriter)> {
        let table = self.table.lock().await;
        table
            .records
            .get(&id)
            .map(|r| (r.info().clone(), r.writer().clone()))
    }

    /// Remove and close a link. Removing an absent identity is a no-op.
    pub async fn remove(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let record = self.table.lock().await.records.remove(&id)?;
        let info = record.info().clone();
        record.close().await;
        Some(info)
    }

    /// Take every record out at once. The caller closes them.
    pub async fn drain(&self) -> Vec<ConnectionRecord> {
        let mut table = self.table.lock().await;
        std::mem::take(&mut table.records).into_values().collect()
    }

    /// Live links, ordered by identity.
    pub async fn list(&self) -> Vec<ConnectionInfo> {
        let table = self.table.lock().await;
        table.records.values().map(|r| r.info().clone()).collect()
    }

    /// `port: None` matches on IP alone; `Some(p)` needs IP and port.
    pub async fn is_duplicate(&self, ip: IpAddr, port: Option<u16>) -> bool {
        self.table.lock().await.is_duplicate(ip, port)
    }

    /// Would a link to `ip` (and `port`) be admitted right now?
    pub async fn check_admission(&self, ip: IpAddr, port: Option<u16>) -> Result<(), AdmissionError> {
        self.table
            .lock()
            .await
            .check_admission(self.capacity, ip, port)
    }

    pub async fn count(&self) -> usize {
        self.table.lock().await.records.len()
    }

    /// Whether `id` was ever handed out, live or not.
    pub async fn was_assigned(&self, id: ConnectionId) -> bool {
        id >= 1 && id <= self.table.lock().await.last_id
    }
}
