//! Per-stream flow control and half-close state machine for a stream
//! multiplexer, independent of any particular wire framing or transport.
//!
//! This crate owns one thing: the `Stream` type, and the bookkeeping it
//! needs (`ReadBuffer`, `WriteQueue`, `Config`) to implement flow-controlled
//! reads and writes, half-close, and reset over a single multiplexed stream.
//! Framing, transport security, and the muxer's stream table all live
//! outside this crate; this crate depends on them only through the
//! [`StreamFeedback`] and [`ConnectionInfo`] traits in [`traits`].
//!
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
#![forbid(unsafe_code)]

pub mod config;
pub mod dupe;
pub mod error;
pub mod read_buffer;
pub mod stream;
pub mod traits;
pub mod write_queue;

pub use config::Config;
pub use dupe::Dupe;
pub use error::StreamError;
pub use stream::{CloseCallback, ReadCallback, Stream, StreamState, WindowAdjustCallback};
pub use traits::{ConnectionError, ConnectionInfo, Directive, DeferredThunk, StreamFeedback, StreamResult};
pub use write_queue::WriteCallback;
