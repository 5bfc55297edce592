//! Bounded Tick Buffer
//!
//! Keeps two independent FIFO windows over the inbound tick stream: a
//! short display window for charting and a longer export window for
//! replay and download. Each window evicts its oldest tick once full.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::domain::tick::Tick;

/// Default display window capacity.
pub const DEFAULT_DISPLAY_CAPACITY: usize = 100;

/// Default export window capacity.
pub const DEFAULT_EXPORT_CAPACITY: usize = 1_000;

/// How recently a tick must have arrived for `has_recent_data` to hold.
pub const DEFAULT_RECENT_DATA_WINDOW: Duration = Duration::from_secs(10);

/// Configuration for the tick buffer.
#[derive(Debug, Clone, Copy)]
pub struct TickBufferConfig {
    /// Display window capacity.
    pub display_capacity: usize,
    /// Export window capacity.
    pub export_capacity: usize,
    /// Recency window for `has_recent_data`.
    pub recent_data_window: Duration,
}

impl Default for TickBufferConfig {
    fn default() -> Self {
        Self {
            display_capacity: DEFAULT_DISPLAY_CAPACITY,
            export_capacity: DEFAULT_EXPORT_CAPACITY,
            recent_data_window: DEFAULT_RECENT_DATA_WINDOW,
        }
    }
}

impl TickBufferConfig {
    /// Create configuration from `BufferSettings`.
    #[must_use]
    pub const fn from_settings(settings: &crate::BufferSettings) -> Self {
        Self {
            display_capacity: settings.display_capacity,
            export_capacity: settings.export_capacity,
            recent_data_window: DEFAULT_RECENT_DATA_WINDOW,
        }
    }
}

#[derive(Debug)]
struct Window {
    capacity: usize,
    ticks: VecDeque<Tick>,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ticks: VecDeque::with_capacity(capacity),
        }
    }

    fn push(&mut self, tick: Tick) {
        if self.capacity == 0 {
            return;
        }
        while self.ticks.len() >= self.capacity {
            self.ticks.pop_front();
        }
        self.ticks.push_back(tick);
    }
}

#[derive(Debug)]
struct BufferState {
    display: Window,
    export: Window,
    last_tick_at: Option<Instant>,
}

/// Two bounded FIFO windows over the live tick stream.
#[derive(Debug)]
pub struct TickBuffer {
    recent_data_window: Duration,
    state: RwLock<BufferState>,
}

impl TickBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new(config: TickBufferConfig) -> Self {
        Self {
            recent_data_window: config.recent_data_window,
            state: RwLock::new(BufferState {
                display: Window::new(config.display_capacity),
                export: Window::new(config.export_capacity),
                last_tick_at: None,
            }),
        }
    }

    /// Append a tick to both windows, evicting the oldest entries as needed.
    pub fn push(&self, tick: Tick) {
        let mut state = self.state.write();
        state.display.push(tick.clone());
        state.export.push(tick);
        state.last_tick_at = Some(Instant::now());
    }

    /// Snapshot of the display window, oldest first.
    #[must_use]
    pub fn display_window(&self) -> Vec<Tick> {
        self.state.read().display.ticks.iter().cloned().collect()
    }

    /// Snapshot of the export window, oldest first.
    #[must_use]
    pub fn export_window(&self) -> Vec<Tick> {
        self.state.read().export.ticks.iter().cloned().collect()
    }

    /// Most recent tick, if any.
    #[must_use]
    pub fn latest(&self) -> Option<Tick> {
        let state = self.state.read();
        state
            .export
            .ticks
            .back()
            .or_else(|| state.display.ticks.back())
            .cloned()
    }

    /// Number of ticks in the display window.
    #[must_use]
    pub fn display_len(&self) -> usize {
        self.state.read().display.ticks.len()
    }

    /// Number of ticks in the export window.
    #[must_use]
    pub fn export_len(&self) -> usize {
        self.state.read().export.ticks.len()
    }

    /// Whether a tick arrived within the recency window.
    #[must_use]
    pub fn has_recent_data(&self) -> bool {
        self.state
            .read()
            .last_tick_at
            .is_some_and(|at| at.elapsed() <= self.recent_data_window)
    }

    /// Serialize the export window as a JSON array.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        let state = self.state.read();
        serde_json::to_string_pretty(&state.export.ticks)
    }

    /// Drop every buffered tick.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.display.ticks.clear();
        state.export.ticks.clear();
        state.last_tick_at = None;
    }
}

impl Default for TickBuffer {
    fn default() -> Self {
        Self::new(TickBufferConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[allow(clippy::cast_precision_loss)]
    fn tick(n: i64) -> Tick {
        Tick::new(n, n as f64, "R_10").unwrap()
    }

    fn small_buffer(display: usize, export: usize) -> TickBuffer {
        TickBuffer::new(TickBufferConfig {
            display_capacity: display,
            export_capacity: export,
            recent_data_window: DEFAULT_RECENT_DATA_WINDOW,
        })
    }

    #[test]
    fn windows_evict_independently() {
        let buffer = small_buffer(3, 5);
        for n in 0..7 {
            buffer.push(tick(n));
        }

        let display: Vec<i64> = buffer
            .display_window()
            .iter()
            .map(Tick::timestamp_millis)
            .collect();
        let export: Vec<i64> = buffer
            .export_window()
            .iter()
            .map(Tick::timestamp_millis)
            .collect();

        assert_eq!(display, vec![4, 5, 6]);
        assert_eq!(export, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn latest_is_most_recent_push() {
        let buffer = TickBuffer::default();
        assert!(buffer.latest().is_none());
        buffer.push(tick(1));
        buffer.push(tick(2));
        assert_eq!(buffer.latest().unwrap().timestamp_millis(), 2);
    }

    #[test]
    fn zero_capacity_window_stays_empty() {
        let buffer = small_buffer(0, 2);
        buffer.push(tick(1));
        assert_eq!(buffer.display_len(), 0);
        assert_eq!(buffer.export_len(), 1);
        assert_eq!(buffer.latest().unwrap().timestamp_millis(), 1);
    }

    #[test]
    fn clear_empties_both_windows() {
        let buffer = TickBuffer::default();
        buffer.push(tick(1));
        buffer.clear();
        assert_eq!(buffer.display_len(), 0);
        assert_eq!(buffer.export_len(), 0);
        assert!(!buffer.has_recent_data());
    }

    #[test]
    fn export_json_is_an_array_of_ticks() {
        let buffer = TickBuffer::default();
        buffer.push(tick(1));
        buffer.push(tick(2));

        let parsed: serde_json::Value = serde_json::from_str(&buffer.export_json().unwrap()).unwrap();
        let items = parsed.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["timestampMillis"], 1);
        assert_eq!(items[1]["market"], "R_10");
    }

    #[tokio::test(start_paused = true)]
    async fn recent_data_expires() {
        let buffer = TickBuffer::default();
        assert!(!buffer.has_recent_data());

        buffer.push(tick(1));
        assert!(buffer.has_recent_data());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!buffer.has_recent_data());
    }

    proptest! {
        #[test]
        fn windows_hold_the_newest_ticks_in_order(
            display in 1usize..50,
            export in 1usize..200,
            count in 0usize..400,
        ) {
            let buffer = small_buffer(display, export);
            for n in 0..count {
                buffer.push(tick(i64::try_from(n).unwrap()));
            }

            let expected = |cap: usize| -> Vec<i64> {
                let start = count.saturating_sub(cap);
                (start..count).map(|n| i64::try_from(n).unwrap()).collect()
            };

            let display_ts: Vec<i64> = buffer.display_window().iter().map(Tick::timestamp_millis).collect();
            let export_ts: Vec<i64> = buffer.export_window().iter().map(Tick::timestamp_millis).collect();

            prop_assert_eq!(display_ts, expected(display));
            prop_assert_eq!(export_ts, expected(export));
        }
    }
}
