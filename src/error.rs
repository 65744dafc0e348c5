//! The stream error taxonomy.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use thiserror::Error;

/// Everything that can terminate a stream operation or the stream itself.
///
/// Variants without a payload are `Copy`, so a single value can be stored in
/// `close_reason` and handed to any number of deferred callbacks without an
/// allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
    /// A user call was malformed: zero length, a buffer shorter than the
    /// claimed size, or (conceptually) a missing callback.
    #[error("invalid argument")]
    InvalidArgument,
    /// A `read`/`read_some` was issued while another read was already pending.
    #[error("a read is already pending on this stream")]
    StreamIsReading,
    /// The read half of the stream is closed.
    #[error("stream is not readable")]
    StreamNotReadable,
    /// The write half of the stream is closed.
    #[error("stream is not writable")]
    StreamNotWritable,
    /// The write queue cannot accept the chunk without exceeding its limit.
    #[error("stream write buffer overflow")]
    StreamWriteBufferOverflow,
    /// `adjust_window_size` was called with a size outside `[receive_window, max_window]`.
    #[error("invalid window size")]
    InvalidWindowSize,
    /// The peer sent more bytes than our receive window permitted. Fatal: the
    /// stream is reset.
    #[error("receive window overflow")]
    ReceiveWindowOverflow,
    /// Clean local close. Surfaces as success to the close callback, as an
    /// error to any other pending callback.
    #[error("stream closed by host")]
    StreamClosedByHost,
    /// The local side called `reset()`.
    #[error("stream reset by host")]
    StreamResetByHost,
    /// The peer sent RST.
    #[error("stream reset by peer")]
    StreamResetByPeer,
    /// The underlying connection is gone.
    #[error("connection closed")]
    ConnectionClosed,
    /// An accounting invariant was violated (e.g. `onDataWritten` acked more
    /// bytes than were ever dequeued). This should never happen; if it does,
    /// the stream resets itself rather than silently drifting.
    #[error("internal error: {0}")]
    InternalError(&'static str),
}

impl StreamError {
    /// Whether this reason represents a clean, host-initiated close as
    /// opposed to an abortive or peer/connection-driven one.
    #[must_use]
    pub fn is_clean_host_close(self) -> bool {
        matches!(self, Self::StreamClosedByHost)
    }
}
