pub mod block_store;
pub mod kv;
pub mod state_ring;
pub mod view_state;

pub use block_store::{Block, BlockStore, NO_PARENT};
pub use kv::{KvStore, SledStore, StoreError};
pub use state_ring::{StateRing, StateSnapshot};
pub use view_state::{Phase, QuorumCertificate, ViewStateBundle, ViewStateStore};
