//! Peer routing and reputation bookkeeping.

use crate::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Receives contact and failure reports about requesting peers.
pub trait PeerReputation: 'static + Send + Sync {
    /// A peer authenticated successfully (or identified itself).
    fn record_contact(&self, node: &NodeId, host: &str, port: u16);

    /// An operation from a peer failed.
    fn record_failure(
        &self,
        op: &str,
        host: &str,
        port: u16,
        key: &str,
        err: &OpError,
    );
}

/// Trait-object [PeerReputation].
pub type DynPeerReputation = Arc<dyn PeerReputation>;

/// What [PeerBook] knows about one `host:port`.
#[derive(Debug, Clone, Default)]
pub struct PeerRecord {
    /// Last node id seen at this address.
    pub node: Option<NodeId>,

    /// When the last successful contact happened.
    pub last_contact: Option<std::time::Instant>,

    /// Successful contacts.
    pub contacts: u64,

    /// Failed operations.
    pub failures: u64,
}

/// In-memory [PeerReputation].
#[derive(Debug, Default)]
pub struct PeerBook(Mutex<HashMap<String, PeerRecord>>);

impl PeerBook {
    /// Look up the record of a peer address.
    pub fn get(&self, host: &str, port: u16) -> Option<PeerRecord> {
        self.0.lock().unwrap().get(&addr_key(host, port)).cloned()
    }

    /// Count of known peer addresses.
    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    /// True if no peer has been seen.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn addr_key(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

impl PeerReputation for PeerBook {
    fn record_contact(&self, node: &NodeId, host: &str, port: u16) {
        let mut lock = self.0.lock().unwrap();
        let rec = lock.entry(addr_key(host, port)).or_default();
        rec.node = Some(*node);
        rec.last_contact = Some(std::time::Instant::now());
        rec.contacts += 1;
    }

    fn record_failure(
        &self,
        op: &str,
        host: &str,
        port: u16,
        key: &str,
        err: &OpError,
    ) {
        tracing::debug!(op, host, port, key, %err, "peer failure recorded");
        self.0
            .lock()
            .unwrap()
            .entry(addr_key(host, port))
            .or_default()
            .failures += 1;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn book_counts_per_address() {
        let book = PeerBook::default();
        let node = NodeId::from_hex(&"ab".repeat(32)).unwrap();

        book.record_contact(&node, "127.0.0.1", 1000);
        book.record_contact(&node, "127.0.0.1", 1000);
        book.record_failure(
            "RETRIEVE",
            "127.0.0.1",
            2000,
            "k",
            &OpError::NotFound("k".into()),
        );

        assert_eq!(2, book.len());
        let a = book.get("127.0.0.1", 1000).unwrap();
        assert_eq!((2, 0, Some(node)), (a.contacts, a.failures, a.node));
        assert!(a.last_contact.is_some());
        let b = book.get("127.0.0.1", 2000).unwrap();
        assert_eq!((0, 1, None), (b.contacts, b.failures, b.node));
        assert!(book.get("127.0.0.1", 3000).is_none());
    }
}
