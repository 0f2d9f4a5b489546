//! Block Store (§4.6): a content-addressed block DAG with parent/children
//! indices and descendant-preserving pruning.

use super::kv::{BatchOp, KvStore, StoreError};
use crate::crypto::{sha3, Hash};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

const TREE_BLOCK: &str = "block";
const TREE_CHILD_TO_PARENT: &str = "block_to_parent";
const TREE_PARENT_TO_CHILDREN: &str = "block_to_children";

/// Sentinel recorded as a genesis block's parent hash; genesis has no
/// parent so it never appears as a key in `block_to_parent`.
pub const NO_PARENT: Hash = [0u8; 32];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub parent_hash: Hash,
    pub post_state_hash: Hash,
    pub command: Vec<u8>,
}

impl Block {
    pub fn genesis(post_state_hash: Hash) -> Self {
        Self {
            parent_hash: NO_PARENT,
            post_state_hash,
            command: Vec::new(),
        }
    }

    /// Content hash: a block's identity.
    pub fn hash(&self) -> Hash {
        let encoded = bincode::serialize(self).expect("block serialization is infallible");
        sha3(&encoded)
    }
}

pub struct BlockStore {
    kv: Arc<dyn KvStore>,
}

impl BlockStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Idempotent: re-inserting an existing block (e.g. genesis on every
    /// startup, in case it was pruned by convention — it never is, per the
    /// pruner's own invariant, but callers don't need to know that) is a
    /// no-op write of the same bytes.
    pub fn put(&self, block: &Block) -> Result<Hash, StoreError> {
        let hash = block.hash();
        let encoded = bincode::serialize(block).expect("block serialization is infallible");

        let mut children: Vec<Hash> = self
            .get_children(&block.parent_hash)?
            .into_iter()
            .collect();
        if !children.contains(&hash) {
            children.push(hash);
        }

        let mut ops = vec![BatchOp::Put {
            tree: TREE_BLOCK,
            key: hash.to_vec(),
            value: encoded,
        }];
        if block.parent_hash != NO_PARENT || self.get(&hash)?.is_none() {
            ops.push(BatchOp::Put {
                tree: TREE_CHILD_TO_PARENT,
                key: hash.to_vec(),
                value: block.parent_hash.to_vec(),
            });
        }
        ops.push(BatchOp::Put {
            tree: TREE_PARENT_TO_CHILDREN,
            key: block.parent_hash.to_vec(),
            value: bincode::serialize(&children).expect("hash vec serialization is infallible"),
        });

        self.kv.apply_batch(ops)?;
        Ok(hash)
    }

    pub fn get(&self, hash: &Hash) -> Result<Option<Block>, StoreError> {
        match self.kv.get(TREE_BLOCK, hash)? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).map_err(|e| StoreError::Corruption(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn contains(&self, hash: &Hash) -> Result<bool, StoreError> {
        Ok(self.get(hash)?.is_some())
    }

    fn get_parent(&self, hash: &Hash) -> Result<Option<Hash>, StoreError> {
        match self.kv.get(TREE_CHILD_TO_PARENT, hash)? {
            Some(bytes) => {
                let arr: Hash = bytes
                    .try_into()
                    .map_err(|_| StoreError::Corruption("malformed parent pointer".into()))?;
                Ok(Some(arr))
            }
            None => Ok(None),
        }
    }

    fn get_children(&self, hash: &Hash) -> Result<Vec<Hash>, StoreError> {
        match self.kv.get(TREE_PARENT_TO_CHILDREN, hash)? {
            Some(bytes) => {
                bincode::deserialize(&bytes).map_err(|e| StoreError::Corruption(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    /// Root-to-`hash` ordered list of block hashes. Fails with
    /// `StorageCorruption` if a parent link is missing before reaching a
    /// genesis block (parent_hash == NO_PARENT).
    pub fn path_from_root(&self, hash: Hash) -> Result<Vec<Hash>, StoreError> {
        let mut path = vec![hash];
        let mut current = hash;
        loop {
            let block = self
                .get(&current)?
                .ok_or_else(|| StoreError::Corruption(format!("missing block {}", hex::encode(current))))?;
            if block.parent_hash == NO_PARENT {
                break;
            }
            path.push(block.parent_hash);
            current = block.parent_hash;
        }
        path.reverse();
        Ok(path)
    }

    /// Compute the descendant closure of `new_root` and delete every
    /// `Block`/`block_to_parent`/`block_to_children` entry outside it.
    /// `new_root` itself is rewritten with `parent_hash = NO_PARENT` so it
    /// becomes the forest's new root.
    pub fn prune_non_descendants(&self, new_root: Hash) -> Result<(), StoreError> {
        let closure = self.descendant_closure(new_root)?;

        let all_block_keys: HashSet<Hash> = self
            .kv
            .scan(TREE_BLOCK)?
            .into_iter()
            .filter_map(|(k, _)| k.try_into().ok())
            .collect();

        let mut ops = Vec::new();

        for hash in all_block_keys.difference(&closure) {
            ops.push(BatchOp::Delete {
                tree: TREE_BLOCK,
                key: hash.to_vec(),
            });
            ops.push(BatchOp::Delete {
                tree: TREE_CHILD_TO_PARENT,
                key: hash.to_vec(),
            });
            ops.push(BatchOp::Delete {
                tree: TREE_PARENT_TO_CHILDREN,
                key: hash.to_vec(),
            });
        }

        let old_root_block = self
            .get(&new_root)?
            .ok_or_else(|| StoreError::Corruption("prune target missing".into()))?;
        let old_parent = old_root_block.parent_hash;
        ops.push(BatchOp::Delete {
            tree: TREE_PARENT_TO_CHILDREN,
            key: old_parent.to_vec(),
        });
        ops.push(BatchOp::Delete {
            tree: TREE_CHILD_TO_PARENT,
            key: new_root.to_vec(),
        });

        let mut new_root_block = old_root_block;
        new_root_block.parent_hash = NO_PARENT;
        let encoded = bincode::serialize(&new_root_block).expect("block serialization is infallible");
        ops.push(BatchOp::Put {
            tree: TREE_BLOCK,
            key: new_root.to_vec(),
            value: encoded,
        });

        self.kv.apply_batch(ops)
    }

    fn descendant_closure(&self, root: Hash) -> Result<HashSet<Hash>, StoreError> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(root);
        seen.insert(root);
        while let Some(h) = queue.pop_front() {
            for child in self.get_children(&h)? {
                if seen.insert(child) {
                    queue.push_back(child);
                }
            }
        }
        Ok(seen)
    }
}
