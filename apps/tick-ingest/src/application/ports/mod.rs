//! Application Ports (Driven)
//!
//! Ports define the interfaces the pipeline uses to reach external
//! systems. Infrastructure adapters implement them; the batcher only
//! ever sees the traits.
//!
//! - `TrainerPort`: trains one frozen batch of tick values
//! - `EpochStorePort`: persists epochs, their ticks, and collection settings

mod epoch_store_port;
mod trainer_port;

pub use epoch_store_port::{EpochStorePort, StoreError};
pub use trainer_port::{TrainerPort, TrainingError};

#[cfg(test)]
pub use epoch_store_port::MockEpochStorePort;
#[cfg(test)]
pub use trainer_port::MockTrainerPort;
