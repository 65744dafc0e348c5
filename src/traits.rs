//! The interfaces the stream uses to talk to its collaborators.
//!
//! Everything in this module is a trait: the muxer, the secure-transport
//! primitive, and the frame codec all live outside this crate (see the
//! PURPOSE & SCOPE of the design this crate implements). The stream depends
//! only on these traits, never on a concrete muxer or transport type.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use std::error::Error as StdError;
use std::fmt;

use crate::error::StreamError;

/// Opaque error returned by a [`ConnectionInfo`] query.
///
/// `ConnectionInfo` is stored behind `Rc<dyn ConnectionInfo>` (one instance
/// shared by every stream on a connection), which rules out an associated
/// `Error` type — the trait has to be object-safe. Implementations wrap
/// whatever their transport layer actually returns.
#[derive(Debug)]
pub struct ConnectionError(pub Box<dyn StdError>);

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl StdError for ConnectionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

/// What the muxer should do with a stream after an ingress call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Keep the stream in the muxer's table.
    Keep,
    /// Remove the stream from the table; no RST is owed to the peer.
    Remove,
    /// Remove the stream from the table and emit a RST frame.
    RemoveAndSendRst,
}

/// A thunk the muxer runs on a later tick of its own event loop.
///
/// `Stream` never invokes a user callback synchronously; every completion
/// goes through [`StreamFeedback::defer_call`] instead.
pub type DeferredThunk = Box<dyn FnOnce()>;

/// The callback surface a `Stream` uses to talk back to its muxer.
///
/// One instance is shared by every stream on a connection (see the data
/// model: `feedback` outlives the stream). Implementations live in the
/// muxer, which is out of scope for this crate.
///
/// None of these methods may call back into the `Stream` that invoked them
/// before returning — `Stream` is not reentrant. `defer_call`'s own thunk is
/// exempt from this since it runs on a later tick, not during the call.
pub trait StreamFeedback {
    /// Hand a chunk to the framer to be sent as a `Data` frame. `some`
    /// marks a write whose callback may fire before the whole original
    /// write is acked (see `WriteQueue::dequeue`). The muxer must later
    /// report how many bytes actually made it onto the wire via
    /// [`crate::stream::Stream::on_data_written`].
    fn write_stream_data(&self, stream_id: u32, bytes: bytes::Bytes, some: bool);

    /// Schedule a `WINDOW_UPDATE` advancing the peer's send window for this
    /// stream by `n` bytes.
    fn ack_received_bytes(&self, stream_id: u32, n: u32);

    /// Emit a FIN frame for this stream (half-close, writes done).
    fn stream_closed(&self, stream_id: u32);

    /// Emit a RST frame for this stream and evict it from the muxer's table.
    fn reset_stream(&self, stream_id: u32);

    /// Schedule `thunk` to run on a future tick of the same execution
    /// context. Must never be invoked synchronously by the caller.
    fn defer_call(&self, thunk: DeferredThunk);
}

/// Read-only queries about the connection a stream is multiplexed over.
///
/// Implemented by the secure-transport primitive, out of scope for this
/// crate; the stream only ever reads through this trait.
pub trait ConnectionInfo {
    /// The remote peer's identity, if the transport can name one.
    fn remote_peer_id(&self) -> Result<String, ConnectionError>;
    /// Whether this side initiated the underlying connection.
    fn is_initiator(&self) -> Result<bool, ConnectionError>;
    /// The local address of the underlying connection.
    fn local_multiaddr(&self) -> Result<String, ConnectionError>;
    /// The remote address of the underlying connection.
    fn remote_multiaddr(&self) -> Result<String, ConnectionError>;
}

/// Result alias used throughout the public read/write/close API: the
/// callback eventually receives one of these.
pub type StreamResult<T> = Result<T, StreamError>;
