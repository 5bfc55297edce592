//! Application Services
//!
//! Services that consume the normalized tick stream.
//!
//! - `TickBuffer`: bounded display and export windows
//! - `EpochBatcher`: fixed-size batching, training dispatch, and epoch commit

mod batcher;
mod tick_buffer;

pub use batcher::{
    BatcherConfig, BatcherError, BatcherEvent, BatcherStatus, DEFAULT_TRAINING_TIMEOUT, EpochBatcher,
};
pub use tick_buffer::{
    DEFAULT_DISPLAY_CAPACITY, DEFAULT_EXPORT_CAPACITY, DEFAULT_RECENT_DATA_WINDOW, TickBuffer,
    TickBufferConfig,
};
