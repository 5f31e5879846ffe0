//! Registry of known peer nodes.
//!
//! Every node periodically announces itself over the control channel; the
//! registry keeps the last received snapshot per peer and expires peers that
//! go quiet. The current node's own record is refreshed locally and is never
//! expired.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tracing::debug;

use surge_proto::PeerInfo;

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

struct PeerEntry {
    info: PeerInfo,
    last_seen: i64,
}

/// Last-seen state of every known peer, including this node.
pub struct PeerRegistry {
    current_uid: String,
    peers: DashMap<String, PeerEntry>,
}

impl PeerRegistry {
    /// Create a registry for the node with the given uid.
    #[must_use]
    pub fn new(current_uid: impl Into<String>) -> Self {
        Self {
            current_uid: current_uid.into(),
            peers: DashMap::new(),
        }
    }

    /// Upsert a peer record and refresh its last-seen time.
    pub fn add(&self, info: PeerInfo) {
        self.add_at(info, unix_now());
    }

    fn add_at(&self, info: PeerInfo, last_seen: i64) {
        self.peers
            .insert(info.uid.clone(), PeerEntry { info, last_seen });
    }

    /// Last received record for a peer.
    #[must_use]
    pub fn get(&self, uid: &str) -> Option<PeerInfo> {
        self.peers.get(uid).map(|entry| entry.info.clone())
    }

    /// Snapshot of every known peer record, including this node's.
    #[must_use]
    pub fn list(&self) -> Vec<PeerInfo> {
        self.peers
            .iter()
            .map(|entry| entry.info.clone())
            .collect()
    }

    /// Number of known peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peers are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Drop peers not seen within `max_delay`. The current node is kept
    /// unconditionally.
    pub fn clean(&self, max_delay: Duration) {
        let cutoff = unix_now() - max_delay.as_secs() as i64;
        self.peers.retain(|uid, entry| {
            if uid == &self.current_uid {
                return true;
            }
            let keep = entry.last_seen >= cutoff;
            if !keep {
                debug!(peer = %uid, "expiring silent peer");
            }
            keep
        });
    }
}
