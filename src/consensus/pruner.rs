//! The pruner background task (§4.9 step 9). Every `prune_interval`, keeps
//! the most recent `block_history_size` blocks on the path to the last
//! executed block and deletes everything else.

use crate::store::view_state::ViewStateStore;
use crate::store::BlockStore;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Pruner {
    block_store: Arc<BlockStore>,
    view_state: Arc<ViewStateStore>,
    block_history_size: usize,
}

impl Pruner {
    pub fn new(
        block_store: Arc<BlockStore>,
        view_state: Arc<ViewStateStore>,
        block_history_size: usize,
    ) -> Self {
        Self {
            block_store,
            view_state,
            block_history_size,
        }
    }

    pub async fn run(self, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick() {
                warn!(error = %e, "pruner tick failed, will retry next interval");
            }
        }
    }

    /// One pruning pass. Exposed separately from `run` so tests can drive
    /// it deterministically instead of waiting on a real timer.
    pub fn tick(&self) -> Result<(), crate::store::StoreError> {
        let bundle = self.view_state.get_bundle()?;
        let path = self.block_store.path_from_root(bundle.last_executed_block_hash)?;

        if path.len() <= self.block_history_size {
            debug!(path_len = path.len(), "pruner: nothing to prune yet");
            return Ok(());
        }

        let pruneable_count = path.len() - self.block_history_size;
        let new_root = path[pruneable_count];

        self.block_store.prune_non_descendants(new_root)?;
        self.view_state.set_root_block_hash(new_root)?;

        debug!(new_root = %hex::encode(new_root), "pruner: pruned non-descendants");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::block_store::Block;
    use crate::store::kv::FakeStore;

    #[test]
    fn prunes_to_exactly_block_history_size() {
        let kv = FakeStore::new();
        let block_store = Arc::new(BlockStore::new(kv.clone()));
        let view_state = Arc::new(ViewStateStore::new(kv));

        let genesis = Block::genesis([0u8; 32]);
        let g = block_store.put(&genesis).unwrap();
        let mut parent = g;
        let mut hashes = vec![g];
        for i in 1..=5u8 {
            let b = Block { parent_hash: parent, post_state_hash: [i; 32], command: vec![i] };
            let h = block_store.put(&b).unwrap();
            hashes.push(h);
            parent = h;
        }
        // path: [g, b1, b2, b3, b4, b5]
        view_state.ensure_genesis(g).unwrap();
        view_state.set_last_executed_block_hash(hashes[5]).unwrap();

        let pruner = Pruner::new(block_store.clone(), view_state.clone(), 3);
        pruner.tick().unwrap();

        assert_eq!(view_state.get_bundle().unwrap().root_block_hash, hashes[3]);
        for h in &hashes[..3] {
            assert!(!block_store.contains(h).unwrap());
        }
        for h in &hashes[3..] {
            assert!(block_store.contains(h).unwrap());
        }
    }

    #[test]
    fn no_prune_when_history_shorter_than_window() {
        let kv = FakeStore::new();
        let block_store = Arc::new(BlockStore::new(kv.clone()));
        let view_state = Arc::new(ViewStateStore::new(kv));
        let genesis = Block::genesis([0u8; 32]);
        let g = block_store.put(&genesis).unwrap();
        view_state.ensure_genesis(g).unwrap();

        let pruner = Pruner::new(block_store.clone(), view_state.clone(), 10);
        pruner.tick().unwrap();

        assert_eq!(view_state.get_bundle().unwrap().root_block_hash, g);
        assert!(block_store.contains(&g).unwrap());
    }
}
