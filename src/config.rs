//! Per-stream tunables, supplied by the embedding muxer.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

/// Window and buffer sizing for a single stream.
///
/// Constructed by the embedding muxer (out of scope for this crate) and
/// passed to [`crate::stream::Stream::new`]. There is no CLI or environment
/// variable surface at this layer; a muxer that wants one builds it on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Initial value of both `send_window` and `receive_window`.
    pub window_size: u32,
    /// Ceiling that `receive_window` (via `adjust_window_size`) may never
    /// exceed. Both windows start equal to `window_size` and grow toward
    /// this ceiling.
    pub max_window: u32,
    /// Maximum total bytes the write queue may hold pending at once.
    pub write_queue_limit: usize,
}

impl Config {
    /// Generous enough that a single stream rarely stalls on flow control in
    /// the common case.
    pub const DEFAULT_WINDOW_SIZE: u32 = 256 * 1024;

    /// Build a config, checking the invariants the rest of the crate relies
    /// on: `max_window >= window_size` and `write_queue_limit >= max_window`.
    ///
    /// # Errors
    /// Returns `Err` with a description if the invariants don't hold.
    pub fn new(
        window_size: u32,
        max_window: u32,
        write_queue_limit: usize,
    ) -> Result<Self, &'static str> {
        if max_window < window_size {
            return Err("max_window must be >= window_size");
        }
        if write_queue_limit < max_window as usize {
            return Err("write_queue_limit must be >= max_window");
        }
        Ok(Self {
            window_size,
            max_window,
            write_queue_limit,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: Self::DEFAULT_WINDOW_SIZE,
            max_window: Self::DEFAULT_WINDOW_SIZE,
            write_queue_limit: Self::DEFAULT_WINDOW_SIZE as usize,
        }
    }
}
