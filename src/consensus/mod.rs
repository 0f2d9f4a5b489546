//! Composition and Pruner (§4.9): wires the network overlay and the three
//! durable stores together, performs crash-recovery view handoff, and
//! drives the periodic pruning background task.

pub mod composition;
pub mod pruner;

pub use composition::{ApplicationService, Composition, HotStuffService, InitialProtocolState};
pub use pruner::Pruner;
