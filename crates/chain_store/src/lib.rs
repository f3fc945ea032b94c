//! Entity storage for managed chains.
//!
//! Five entity kinds (chains, validators, backups, upgrades and events) share one
//! [`EntityStore`] facade. The storage engine behind it is a [`Backend`] chosen once at
//! startup: [`MemoryBackend`] for process-local runs or [`SledBackend`] for durable ones.

mod entity;
mod error;
mod locks;
mod memory;
mod sled_store;
mod status;
mod store;
mod types;

pub use entity::{Entity, EntityKind, Mutable, SoftDelete};
pub use error::{StoreError, StoreResult};
pub use locks::ChainLocks;
pub use memory::MemoryBackend;
pub use sled_store::SledBackend;
pub use status::{ChainStatus, ChainTransition, InvalidTransition};
pub use store::{Backend, EntityStore, Record, StoreBackend};
pub use types::*;
