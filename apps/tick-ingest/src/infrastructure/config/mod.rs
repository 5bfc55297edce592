//! Configuration Module
//!
//! Configuration loading for the tick ingest pipeline.

mod settings;

pub use settings::{
    BatchingSettings, BufferSettings, ConfigError, DEFAULT_FEED_SYMBOL, DEFAULT_FEED_URL,
    FeedSettings, PipelineConfig, ServerSettings, WebSocketSettings,
};
