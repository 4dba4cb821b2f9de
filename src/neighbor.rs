use crate::session::WorkerHandle;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use thiserror::Error;

/// Where a session attempt for a neighbor currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Invalid,
    Inactive,
    Pending,
    Ready,
    Active,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Invalid => "INVALID",
            Self::Inactive => "INACTIVE",
            Self::Pending => "PENDING",
            Self::Ready => "READY",
            Self::Active => "ACTIVE",
        };

        f.write_str(s)
    }
}

/// Everything the supervisor knows about one remote node.
pub struct Neighbor {
    pub neighbor_id: u32,
    pub state: SessionState,
    pub session_id: u16,
    pub child_port: u16,
    pub peer_pid: u32,
    pub child_pid: u32,
    pub last_seqnum: u32,
    pub missed_seqnum: u32,
    pub created: Instant,
    pub handle: Option<WorkerHandle>,
}

impl Neighbor {
    fn new(neighbor_id: u32) -> Self {
        Self {
            neighbor_id,
            state: SessionState::Inactive,
            session_id: 0,
            child_port: 0,
            peer_pid: 0,
            child_pid: 0,
            last_seqnum: 0,
            missed_seqnum: 0,
            created: Instant::now(),
            handle: None,
        }
    }

    /// Account a control-message sequence number from this neighbor's
    /// worker; gaps count as missed.
    pub fn record_seqnum(&mut self, seq: u32) {
        if seq > self.last_seqnum.wrapping_add(1) {
            self.missed_seqnum += seq - self.last_seqnum - 1;
        }

        self.last_seqnum = seq;
    }

    /// One line of `show` output.
    pub fn show_line(&self) -> String {
        format!(
            "Neighbor ID {} state {}, remote pid {}, local pid {}, port {}, \
             session id {}, last seqnum {}, num missed seqnum {}",
            self.neighbor_id,
            self.state,
            self.peer_pid,
            self.child_pid,
            self.child_port,
            self.session_id,
            self.last_seqnum,
            self.missed_seqnum,
        )
    }

    /// Reset the record to a fresh INACTIVE state after tear-down, dropping
    /// the worker handle.
    pub fn reset(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.cancel.cancel();
        }

        self.state = SessionState::Inactive;
        self.session_id = 0;
        self.child_port = 0;
        self.peer_pid = 0;
        self.child_pid = 0;
        self.last_seqnum = 0;
        self.missed_seqnum = 0;
        self.created = Instant::now();
    }
}

/// The supervisor-owned table of neighbor records, keyed by neighbor id.
pub struct NeighborTable {
    neighbors: HashMap<u32, Neighbor>,
    max_neighbors: u32,
}

impl NeighborTable {
    pub fn new(max_neighbors: u32) -> Self {
        Self {
            neighbors: HashMap::new(),
            max_neighbors,
        }
    }

    /// Find or create a record for `neighbor_id`.
    pub fn init(&mut self, neighbor_id: u32) -> Result<&mut Neighbor, TableFull> {
        if !self.neighbors.contains_key(&neighbor_id)
            && self.neighbors.len() as u32 >= self.max_neighbors
        {
            return Err(TableFull(self.max_neighbors));
        }

        Ok(self
            .neighbors
            .entry(neighbor_id)
            .or_insert_with(|| Neighbor::new(neighbor_id)))
    }

    pub fn get(&self, neighbor_id: u32) -> Option<&Neighbor> {
        self.neighbors.get(&neighbor_id)
    }

    pub fn get_mut(&mut self, neighbor_id: u32) -> Option<&mut Neighbor> {
        self.neighbors.get_mut(&neighbor_id)
    }

    pub fn by_session_id(&self, session_id: u16) -> Option<&Neighbor> {
        self.neighbors
            .values()
            .find(|n| n.session_id == session_id)
    }

    pub fn release(&mut self, neighbor_id: u32) -> Option<Neighbor> {
        self.neighbors.remove(&neighbor_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Neighbor> {
        self.neighbors.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Neighbor> {
        self.neighbors.values_mut()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.neighbors.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }
}

#[derive(Debug, Error)]
#[error("neighbor table full (max {0})")]
pub struct TableFull(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_returns_existing_record() {
        let mut table = NeighborTable::new(4);

        table.init(20).unwrap().session_id = 0x1234;

        assert_eq!(table.init(20).unwrap().session_id, 0x1234);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn max_neighbors_enforced() {
        let mut table = NeighborTable::new(2);

        table.init(1).unwrap();
        table.init(2).unwrap();

        assert!(table.init(3).is_err());
        // Existing records are still reachable at the limit.
        assert!(table.init(2).is_ok());
    }

    #[test]
    fn seqnum_gap_counts_missed() {
        let mut table = NeighborTable::new(4);
        let nbr = table.init(20).unwrap();

        nbr.record_seqnum(1);
        nbr.record_seqnum(2);

        assert_eq!(nbr.missed_seqnum, 0);

        nbr.record_seqnum(5);

        assert_eq!(nbr.last_seqnum, 5);
        assert_eq!(nbr.missed_seqnum, 2);
    }

    #[test]
    fn lookup_by_session_id() {
        let mut table = NeighborTable::new(4);

        table.init(20).unwrap().session_id = 0x1234;
        table.init(30).unwrap().session_id = 0x5678;

        assert_eq!(table.by_session_id(0x5678).unwrap().neighbor_id, 30);
        assert!(table.by_session_id(0x9999).is_none());
    }

    #[test]
    fn reset_clears_session_fields() {
        let mut table = NeighborTable::new(4);
        let nbr = table.init(20).unwrap();

        nbr.state = SessionState::Active;
        nbr.session_id = 0x1234;
        nbr.child_pid = 7;
        nbr.record_seqnum(9);
        nbr.reset();

        assert_eq!(nbr.state, SessionState::Inactive);
        assert_eq!(nbr.session_id, 0);
        assert_eq!(nbr.child_pid, 0);
        assert_eq!(nbr.last_seqnum, 0);
    }
}
