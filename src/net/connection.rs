//! Connections Register (§4.2): the single shared mutable state between the
//! dialer, acceptor, and multiplexer loops. All access is through its two
//! atomic operations; callers never hold a lock across an `.await`.

use super::tls::EncryptedStream;
use super::types::{Direction, PeerAddress, PeerKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Identifies one registration of a `Connection` in the register, distinct
/// from its `remote_key`: a peer can be registered, deregistered, and
/// re-registered with a fresh connection, and `deregister` must not let a
/// stale caller evict the newer registration (§4.2).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ConnectionId(u64);

/// A live, mutually authenticated connection to a federation peer.
pub struct Connection {
    pub remote_key: PeerKey,
    pub remote_server_address: PeerAddress,
    pub direction: Direction,
    /// Stamped in by `register_if_absent` once this connection wins the
    /// register race; meaningless before that.
    pub id: ConnectionId,
    stream: Option<EncryptedStream>,
}

impl Connection {
    pub fn new(remote_server_address: PeerAddress, direction: Direction, stream: EncryptedStream) -> Self {
        Self {
            remote_key: PeerKey(stream.remote_key),
            remote_server_address,
            direction,
            id: ConnectionId(0),
            stream: Some(stream),
        }
    }

    /// Take ownership of the underlying stream, e.g. to hand it to the
    /// multiplexer's reader task. Leaves the `Connection` record usable as
    /// a register entry (key/address/direction remain valid) but unable to
    /// be read from or written to again.
    pub fn take_stream(&mut self) -> Option<EncryptedStream> {
        self.stream.take()
    }
}

/// In-memory map from `PeerKey` to live `Connection`, enforcing the
/// at-most-one-connection-per-peer invariant (§8 invariant 1).
pub struct ConnectionsRegister {
    entries: Mutex<HashMap<PeerKey, ConnectionHandle>>,
    next_id: AtomicU64,
}

/// What the register actually stores for a live peer.
struct ConnectionHandle {
    remote_server_address: PeerAddress,
    direction: Direction,
    id: ConnectionId,
}

impl ConnectionsRegister {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Atomically insert a connection for `remote_key`, unless an entry
    /// already exists. Returns the fresh `ConnectionId` on success — the
    /// caller must stamp it into the `Connection` it's about to hand off,
    /// since `deregister` only removes an entry that still carries this
    /// exact id. Returns `None` if an incumbent already held the key (the
    /// caller must close the connection it was about to register).
    pub fn register_if_absent(
        &self,
        remote_key: PeerKey,
        remote_server_address: PeerAddress,
        direction: Direction,
    ) -> Option<ConnectionId> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&remote_key) {
            debug!(peer = %remote_key, "register_if_absent: incumbent present, rejecting");
            return None;
        }
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        entries.insert(
            remote_key,
            ConnectionHandle {
                remote_server_address,
                direction,
                id,
            },
        );
        debug!(peer = %remote_key, ?direction, "registered connection");
        Some(id)
    }

    /// Remove the entry for `remote_key`, but only if it's still the
    /// registration identified by `id` (§4.2: "remove only if the currently
    /// registered entry is identity-equal to conn"). A stale `deregister`
    /// from a connection that already lost its slot to a newer registration
    /// for the same peer is a no-op, not an eviction of the newer one.
    pub fn deregister(&self, remote_key: PeerKey, id: ConnectionId) {
        let mut entries = self.entries.lock().unwrap();
        if entries.get(&remote_key).is_some_and(|h| h.id == id) {
            entries.remove(&remote_key);
            debug!(peer = %remote_key, "deregistered connection");
        }
    }

    pub fn contains(&self, remote_key: &PeerKey) -> bool {
        self.entries.lock().unwrap().contains_key(remote_key)
    }

    pub fn keys(&self) -> Vec<PeerKey> {
        self.entries.lock().unwrap().keys().copied().collect()
    }

    pub fn get_server_address(&self, remote_key: &PeerKey) -> Option<PeerAddress> {
        self.entries
            .lock()
            .unwrap()
            .get(remote_key)
            .map(|h| h.remote_server_address)
    }

    pub fn get_direction(&self, remote_key: &PeerKey) -> Option<Direction> {
        self.entries.lock().unwrap().get(remote_key).map(|h| h.direction)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
