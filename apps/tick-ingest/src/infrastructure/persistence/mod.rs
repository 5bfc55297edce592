//! Persistence Adapters
//!
//! Implementations of `EpochStorePort`.

mod in_memory;

pub use in_memory::InMemoryEpochStore;
