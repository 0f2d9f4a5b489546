//! §4.9 startup sequence and the external-collaborator interfaces it feeds
//! (§4.10): the HotStuff protocol state machine and the application it
//! drives are out of scope, but the value handed to them at construction
//! is fully specified here.

use crate::config::Config;
use crate::error::CompositionError;
use crate::net::manager::ConnectionManager;
use crate::net::types::{FederationMember, PeerKey};
use crate::store::block_store::Block;
use crate::store::kv::{KvStore, SledStore};
use crate::store::state_ring::{StateRing, StateSnapshot};
use crate::store::view_state::{Phase, QuorumCertificate, ViewStateStore};
use crate::store::BlockStore;
use std::sync::Arc;
use tracing::info;

/// The protocol state fed to the HotStuff service at construction (§4.9
/// step 8, §8 invariant 6).
#[derive(Debug, Clone)]
pub struct InitialProtocolState {
    pub view_number: u64,
    pub phase: Phase,
    pub prepare_qc: QuorumCertificate,
    pub locked_qc: QuorumCertificate,
    pub commit_qc: QuorumCertificate,
    pub prepared_block: Block,
}

/// Deterministic state transition applied when a block commits. The demo
/// application (out of scope) implements this; tests use a trivial one.
pub trait ApplicationService: Send + Sync {
    fn apply(&self, parent_state: &StateSnapshot, command: &[u8]) -> StateSnapshot;
}

/// The HotStuff protocol state machine itself (out of scope): this trait
/// only names its construction interface so C9 can specify what feeds it.
#[async_trait::async_trait]
pub trait HotStuffService: Send + Sync {
    async fn run(self: Arc<Self>);
}

/// Wires C1–C8 together per §4.9 and owns the pruner background task.
pub struct Composition {
    pub network: Arc<ConnectionManager>,
    pub block_store: Arc<BlockStore>,
    pub view_state: Arc<ViewStateStore>,
    pub state_ring: Arc<StateRing>,
    pub initial_state: InitialProtocolState,
    pruner_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Composition {
    /// Runs startup steps 1–8. Step 9 (starting the pruner) is a separate
    /// call (`spawn_pruner`) so callers can start the application/HotStuff
    /// services with `initial_state` first, matching the step ordering.
    ///
    /// On failure, everything acquired so far is dropped before returning,
    /// which tears down the listener/dial tasks the `ConnectionManager`
    /// owns.
    pub async fn start(config: &Config, node_index: usize) -> Result<Self, CompositionError> {
        let node_entry = config.validate_node_index(node_index)?;
        let local_address = node_entry.address;

        let federation: Vec<FederationMember> = config
            .network
            .nodes
            .iter()
            .map(|n| FederationMember {
                key: n.public_key,
                address: n.address,
            })
            .collect();

        let node_dir = config.node_dir(node_index);
        std::fs::create_dir_all(&node_dir)?;

        // Step 1-2: encrypted provider + connection manager, dial queue seeded.
        let network = Arc::new(
            ConnectionManager::start(&node_dir, local_address, federation)
                .await
                .map_err(CompositionError::Net)?,
        );

        // Step 3: open the KV store.
        let kv: Arc<dyn KvStore> = Arc::new(SledStore::open(&node_dir)?);

        // Step 4: block store + genesis.
        let block_store = Arc::new(BlockStore::new(kv.clone()));
        let genesis_state = StateSnapshot(Vec::new());
        let genesis_hash_seed = crate::crypto::sha3(b"genesis");
        let genesis_block = Block::genesis(genesis_hash_seed);
        let genesis_hash = block_store.put(&genesis_block)?;

        // Step 5: view state store + genesis bundle.
        let view_state = Arc::new(ViewStateStore::new(kv.clone()));
        view_state.ensure_genesis(genesis_hash)?;

        // Step 6: state ring + genesis snapshot, bypassing eviction.
        let state_ring = Arc::new(StateRing::new(kv.clone(), config.db.state_history_size));
        state_ring.put_genesis(genesis_hash, &genesis_state)?;

        // Step 7: load persisted bundle, fetch the prepared block.
        let bundle = view_state.get_bundle()?;
        let prepared_block = block_store
            .get(&bundle.prepare_qc.block_hash)?
            .ok_or_else(|| {
                CompositionError::StorageCorruption(format!(
                    "prepareQC block {} missing from block store",
                    hex::encode(bundle.prepare_qc.block_hash)
                ))
            })?;

        // Step 8: compute the initial protocol state handed to consensus.
        let initial_state = InitialProtocolState {
            view_number: bundle.view_number + 1,
            phase: Phase::Prepare,
            prepare_qc: bundle.prepare_qc.clone(),
            locked_qc: bundle.locked_qc.clone(),
            commit_qc: bundle.commit_qc.clone(),
            prepared_block,
        };

        info!(
            node_index,
            view_number = initial_state.view_number,
            "composition ready, resuming at view"
        );

        Ok(Self {
            network,
            block_store,
            view_state,
            state_ring,
            initial_state,
            pruner_handle: None,
        })
    }

    /// Step 9: start the pruner background task.
    pub fn spawn_pruner(&mut self, prune_interval: std::time::Duration, block_history_size: usize) {
        let pruner = crate::consensus::pruner::Pruner::new(
            self.block_store.clone(),
            self.view_state.clone(),
            block_history_size,
        );
        self.pruner_handle = Some(tokio::spawn(pruner.run(prune_interval)));
    }

    pub async fn shutdown(mut self) {
        if let Some(handle) = self.pruner_handle.take() {
            handle.abort();
        }
        if let Ok(network) = Arc::try_unwrap(self.network) {
            network.shutdown().await;
        }
    }

    pub fn local_key(&self) -> PeerKey {
        use crate::net::NetworkTransport;
        self.network.local_key()
    }
}
