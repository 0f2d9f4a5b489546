//! Bounded State Ring (§4.8): a fixed-capacity FIFO of application-state
//! snapshots keyed by block hash. Genesis is written directly to the
//! underlying collection, bypassing the ring, so it is never evicted.

use super::kv::{BatchOp, KvStore, StoreError};
use crate::crypto::Hash;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const TREE_STATE: &str = "state";
const TREE_STATE_META: &str = "state_meta";
const KEY_ORDER: &[u8] = b"order";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot(pub Vec<u8>);

pub struct StateRing {
    kv: Arc<dyn KvStore>,
    capacity: usize,
}

impl StateRing {
    pub fn new(kv: Arc<dyn KvStore>, capacity: usize) -> Self {
        Self { kv, capacity }
    }

    /// Write the genesis snapshot directly, without affecting eviction
    /// order. Idempotent.
    pub fn put_genesis(&self, hash: Hash, snapshot: &StateSnapshot) -> Result<(), StoreError> {
        let encoded = bincode::serialize(snapshot).expect("snapshot serialization is infallible");
        self.kv.apply_batch(vec![BatchOp::Put {
            tree: TREE_STATE,
            key: hash.to_vec(),
            value: encoded,
        }])
    }

    /// Insert `(hash, snapshot)`; if the ring is now over capacity, evict
    /// the oldest tracked insertion (genesis is never tracked here, so it
    /// can never be evicted this way).
    pub fn put(&self, hash: Hash, snapshot: &StateSnapshot) -> Result<(), StoreError> {
        let mut order = self.get_order()?;
        order.retain(|h| *h != hash);
        order.push(hash);

        let mut ops = vec![BatchOp::Put {
            tree: TREE_STATE,
            key: hash.to_vec(),
            value: bincode::serialize(snapshot).expect("snapshot serialization is infallible"),
        }];

        while order.len() > self.capacity {
            let evicted = order.remove(0);
            ops.push(BatchOp::Delete {
                tree: TREE_STATE,
                key: evicted.to_vec(),
            });
        }

        ops.push(BatchOp::Put {
            tree: TREE_STATE_META,
            key: KEY_ORDER.to_vec(),
            value: bincode::serialize(&order).expect("order serialization is infallible"),
        });

        self.kv.apply_batch(ops)
    }

    pub fn get(&self, hash: &Hash) -> Result<Option<StateSnapshot>, StoreError> {
        match self.kv.get(TREE_STATE, hash)? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).map_err(|e| StoreError::Corruption(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn get_order(&self) -> Result<Vec<Hash>, StoreError> {
        match self.kv.get(TREE_STATE_META, KEY_ORDER)? {
            Some(bytes) => {
                bincode::deserialize(&bytes).map_err(|e| StoreError::Corruption(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::FakeStore;

    fn h(b: u8) -> Hash {
        [b; 32]
    }

    #[test]
    fn genesis_survives_many_ring_cycles() {
        let ring = StateRing::new(FakeStore::new(), 2);
        let genesis = h(0);
        ring.put_genesis(genesis, &StateSnapshot(vec![0])).unwrap();

        for i in 1..=10u8 {
            ring.put(h(i), &StateSnapshot(vec![i])).unwrap();
        }

        assert!(ring.get(&genesis).unwrap().is_some());
    }

    #[test]
    fn ring_evicts_strictly_the_oldest() {
        let ring = StateRing::new(FakeStore::new(), 2);
        ring.put(h(1), &StateSnapshot(vec![1])).unwrap();
        ring.put(h(2), &StateSnapshot(vec![2])).unwrap();
        ring.put(h(3), &StateSnapshot(vec![3])).unwrap();
        ring.put(h(4), &StateSnapshot(vec![4])).unwrap();

        assert!(ring.get(&h(1)).unwrap().is_none());
        assert!(ring.get(&h(2)).unwrap().is_none());
        assert!(ring.get(&h(3)).unwrap().is_some());
        assert!(ring.get(&h(4)).unwrap().is_some());
    }
}
