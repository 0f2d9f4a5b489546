//! View State Store (§4.7): the single persisted `ViewStateBundle`.

use super::kv::{BatchOp, KvStore, StoreError};
use crate::crypto::Hash;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const TREE_VIEW_STATE: &str = "view_state";
const KEY_BUNDLE: &[u8] = b"bundle";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Prepare,
    PreCommit,
    Commit,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCertificate {
    pub phase: Phase,
    pub view_number: u64,
    pub block_hash: Hash,
    pub aggregate_signature: Vec<u8>,
}

impl QuorumCertificate {
    pub fn genesis(genesis_hash: Hash) -> Self {
        Self {
            phase: Phase::Prepare,
            view_number: 0,
            block_hash: genesis_hash,
            aggregate_signature: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewStateBundle {
    pub view_number: u64,
    pub prepare_qc: QuorumCertificate,
    pub locked_qc: QuorumCertificate,
    pub commit_qc: QuorumCertificate,
    pub root_block_hash: Hash,
    pub last_executed_block_hash: Hash,
}

impl ViewStateBundle {
    pub fn genesis(genesis_hash: Hash) -> Self {
        let qc = QuorumCertificate::genesis(genesis_hash);
        Self {
            view_number: 0,
            prepare_qc: qc.clone(),
            locked_qc: qc.clone(),
            commit_qc: qc,
            root_block_hash: genesis_hash,
            last_executed_block_hash: genesis_hash,
        }
    }
}

pub struct ViewStateStore {
    kv: Arc<dyn KvStore>,
}

impl ViewStateStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Ensure a bundle exists, seeding one rooted at genesis if absent.
    /// Idempotent across restarts.
    pub fn ensure_genesis(&self, genesis_hash: Hash) -> Result<(), StoreError> {
        if self.kv.get(TREE_VIEW_STATE, KEY_BUNDLE)?.is_none() {
            self.put_bundle(&ViewStateBundle::genesis(genesis_hash))?;
        }
        Ok(())
    }

    pub fn get_bundle(&self) -> Result<ViewStateBundle, StoreError> {
        let bytes = self
            .kv
            .get(TREE_VIEW_STATE, KEY_BUNDLE)?
            .ok_or_else(|| StoreError::Corruption("view state bundle missing".into()))?;
        bincode::deserialize(&bytes).map_err(|e| StoreError::Corruption(e.to_string()))
    }

    pub fn put_bundle(&self, bundle: &ViewStateBundle) -> Result<(), StoreError> {
        let encoded = bincode::serialize(bundle).expect("bundle serialization is infallible");
        self.kv.apply_batch(vec![BatchOp::Put {
            tree: TREE_VIEW_STATE,
            key: KEY_BUNDLE.to_vec(),
            value: encoded,
        }])
    }

    pub fn set_last_executed_block_hash(&self, hash: Hash) -> Result<(), StoreError> {
        let mut bundle = self.get_bundle()?;
        bundle.last_executed_block_hash = hash;
        self.put_bundle(&bundle)
    }

    pub fn set_root_block_hash(&self, hash: Hash) -> Result<(), StoreError> {
        let mut bundle = self.get_bundle()?;
        bundle.root_block_hash = hash;
        self.put_bundle(&bundle)
    }

    pub fn set_view_number(&self, view_number: u64) -> Result<(), StoreError> {
        let mut bundle = self.get_bundle()?;
        bundle.view_number = view_number;
        self.put_bundle(&bundle)
    }

    pub fn set_prepare_qc(&self, qc: QuorumCertificate) -> Result<(), StoreError> {
        let mut bundle = self.get_bundle()?;
        bundle.prepare_qc = qc;
        self.put_bundle(&bundle)
    }

    pub fn set_locked_qc(&self, qc: QuorumCertificate) -> Result<(), StoreError> {
        let mut bundle = self.get_bundle()?;
        bundle.locked_qc = qc;
        self.put_bundle(&bundle)
    }

    pub fn set_commit_qc(&self, qc: QuorumCertificate) -> Result<(), StoreError> {
        let mut bundle = self.get_bundle()?;
        bundle.commit_qc = qc;
        self.put_bundle(&bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::FakeStore;

    #[test]
    fn ensure_genesis_seeds_once() {
        let store = ViewStateStore::new(FakeStore::new());
        let g = [7u8; 32];
        store.ensure_genesis(g).unwrap();
        let bundle = store.get_bundle().unwrap();
        assert_eq!(bundle.view_number, 0);
        assert_eq!(bundle.root_block_hash, g);
        assert_eq!(bundle.last_executed_block_hash, g);

        store.set_view_number(9).unwrap();
        store.ensure_genesis(g).unwrap();
        assert_eq!(store.get_bundle().unwrap().view_number, 9);
    }

    #[test]
    fn setters_are_independent() {
        let store = ViewStateStore::new(FakeStore::new());
        let g = [1u8; 32];
        store.ensure_genesis(g).unwrap();
        store.set_last_executed_block_hash([2u8; 32]).unwrap();
        store.set_root_block_hash([3u8; 32]).unwrap();
        let bundle = store.get_bundle().unwrap();
        assert_eq!(bundle.last_executed_block_hash, [2u8; 32]);
        assert_eq!(bundle.root_block_hash, [3u8; 32]);
        assert_eq!(bundle.prepare_qc.block_hash, g);
    }
}
