//! The stream state machine: the one type everything else in this crate exists
//! to support.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::dupe::Dupe;
use crate::error::StreamError;
use crate::read_buffer::ReadBuffer;
use crate::traits::{ConnectionError, ConnectionInfo, Directive, StreamFeedback, StreamResult};
use crate::write_queue::{WriteCallback, WriteQueue};

/// Completion callback for [`Stream::read`]/[`Stream::read_some`]. Always
/// hands the buffer back, filled with up to the returned count of bytes,
/// whether the read succeeded or failed.
pub type ReadCallback = Box<dyn FnOnce(Vec<u8>, StreamResult<usize>)>;

/// Completion callback for [`Stream::close`].
pub type CloseCallback = Box<dyn FnOnce(StreamResult<()>)>;

/// Completion callback for [`Stream::adjust_window_size`].
pub type WindowAdjustCallback = Box<dyn FnOnce(StreamResult<()>)>;

/// The derived lifecycle state of a stream, computed from `is_readable`,
/// `is_writable` and `close_reason` rather than stored redundantly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Both directions open.
    Open,
    /// Local writes are closed; still readable.
    HalfClosedLocal,
    /// Remote writes (our reads) are closed; still writable.
    HalfClosedRemote,
    /// Fully closed, one way or another.
    Closed,
}

struct PendingRead {
    buf: Vec<u8>,
    requested: usize,
    filled: usize,
    accept_partial: bool,
    callback: ReadCallback,
}

struct PendingWindowAdjust {
    target: u32,
    callback: WindowAdjustCallback,
}

struct StreamShared {
    id: u32,
    connection: Rc<dyn ConnectionInfo>,
    feedback: Rc<dyn StreamFeedback>,

    send_window: u32,
    receive_window: u32,
    max_window: u32,

    is_readable: bool,
    is_writable: bool,
    close_reason: Option<StreamError>,
    /// Set once by `reset()`; once true, no deferred callback fires again,
    /// even one already scheduled before the reset.
    no_more_callbacks: bool,
    /// Write-once guard on the FIN emission in `do_write`, independent of
    /// `is_writable`: without it a second drain pass after the write half is
    /// already closed (e.g. a stray `increase_send_window` on a half-closed
    /// stream) would emit `stream_closed` twice.
    fin_emitted: bool,

    read_buffer: ReadBuffer,
    write_queue: WriteQueue,

    pending_read: Option<PendingRead>,
    pending_close: Option<CloseCallback>,
    pending_window_adjust: Option<PendingWindowAdjust>,
}

impl StreamShared {
    fn state(&self) -> StreamState {
        if self.close_reason.is_some() {
            return StreamState::Closed;
        }
        match (self.is_readable, self.is_writable) {
            (true, true) => StreamState::Open,
            (true, false) => StreamState::HalfClosedLocal,
            (false, true) => StreamState::HalfClosedRemote,
            (false, false) => StreamState::Closed,
        }
    }
}

/// A single multiplexed stream.
///
/// Cheap to clone — every clone is a refcount bump on the same shared state.
/// There is no locking here: `Stream` assumes it is only ever touched from
/// the one task driving the muxer's event loop, per the concurrency model
/// this crate implements.
#[derive(Clone)]
pub struct Stream(Rc<RefCell<StreamShared>>);

impl Dupe for Stream {}

impl Stream {
    /// Construct a new stream. `id` is meaningful only to the muxer and its
    /// `feedback`/`connection` collaborators; this crate never interprets it.
    #[must_use]
    pub fn new(
        id: u32,
        connection: Rc<dyn ConnectionInfo>,
        feedback: Rc<dyn StreamFeedback>,
        config: Config,
    ) -> Self {
        let shared = StreamShared {
            id,
            connection,
            feedback,
            send_window: config.window_size,
            receive_window: config.window_size,
            max_window: config.max_window,
            is_readable: true,
            is_writable: true,
            close_reason: None,
            no_more_callbacks: false,
            fin_emitted: false,
            read_buffer: ReadBuffer::new(),
            write_queue: WriteQueue::new(config.write_queue_limit),
            pending_read: None,
            pending_close: None,
            pending_window_adjust: None,
        };
        trace!(stream_id = id, "stream created");
        Self(Rc::new(RefCell::new(shared)))
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.0.borrow().id
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.0.borrow().state()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == StreamState::Closed
    }

    #[must_use]
    pub fn is_closed_for_read(&self) -> bool {
        !self.0.borrow().is_readable
    }

    #[must_use]
    pub fn is_closed_for_write(&self) -> bool {
        !self.0.borrow().is_writable
    }

    pub fn remote_peer_id(&self) -> Result<String, ConnectionError> {
        self.0.borrow().connection.remote_peer_id()
    }

    pub fn is_initiator(&self) -> Result<bool, ConnectionError> {
        self.0.borrow().connection.is_initiator()
    }

    pub fn local_multiaddr(&self) -> Result<String, ConnectionError> {
        self.0.borrow().connection.local_multiaddr()
    }

    pub fn remote_multiaddr(&self) -> Result<String, ConnectionError> {
        self.0.borrow().connection.remote_multiaddr()
    }

    // -- deferred-callback wrapping -----------------------------------------
    //
    // Every user-facing callback is wrapped exactly once, at the point the
    // user hands it to us, into a closure that captures a `Weak` handle and
    // hands the *real* invocation to `feedback.defer_call`. Everything below
    // this point can therefore "call" a stored callback directly, even while
    // holding the shared `RefCell` borrow: doing so only ever schedules a
    // thunk, it never runs user code synchronously.

    fn wrap_read(&self, cb: ReadCallback) -> ReadCallback {
        let weak = Rc::downgrade(&self.0);
        let feedback = Rc::clone(&self.0.borrow().feedback);
        Box::new(move |buf: Vec<u8>, result: StreamResult<usize>| {
            feedback.defer_call(Box::new(move || {
                if let Some(strong) = weak.upgrade() {
                    if !strong.borrow().no_more_callbacks {
                        cb(buf, result);
                    }
                }
            }));
        })
    }

    fn wrap_close(&self, cb: CloseCallback) -> CloseCallback {
        self.wrap_unary(cb)
    }

    fn wrap_window_adjust(&self, cb: WindowAdjustCallback) -> WindowAdjustCallback {
        self.wrap_unary(cb)
    }

    fn wrap_unary<T: 'static>(&self, cb: Box<dyn FnOnce(T)>) -> Box<dyn FnOnce(T)> {
        let weak = Rc::downgrade(&self.0);
        let feedback = Rc::clone(&self.0.borrow().feedback);
        Box::new(move |value: T| {
            feedback.defer_call(Box::new(move || {
                if let Some(strong) = weak.upgrade() {
                    if !strong.borrow().no_more_callbacks {
                        cb(value);
                    }
                }
            }));
        })
    }

    // -- public read/write/close/reset/window API ---------------------------

    /// Read exactly `n` bytes into `buf` (which must be at least `n` bytes
    /// long). `cb` fires once `n` bytes have been delivered, or with an
    /// error.
    pub fn read(&self, buf: Vec<u8>, n: usize, cb: ReadCallback) {
        self.read_impl(buf, n, false, cb);
    }

    /// Read at least 1 and at most `n` bytes into `buf`. `cb` fires as soon
    /// as any bytes are available, or with an error.
    pub fn read_some(&self, buf: Vec<u8>, n: usize, cb: ReadCallback) {
        self.read_impl(buf, n, true, cb);
    }

    fn read_impl(&self, mut buf: Vec<u8>, n: usize, accept_partial: bool, cb: ReadCallback) {
        let cb = self.wrap_read(cb);

        if n == 0 || buf.len() < n {
            cb(buf, Err(StreamError::InvalidArgument));
            return;
        }

        let mut shared = self.0.borrow_mut();
        let threshold = if accept_partial { 1 } else { n };

        if shared.read_buffer.size() >= threshold {
            let copied = shared.read_buffer.consume(&mut buf[..n]);
            Self::ack_drained(&mut shared, copied as u32);
            trace!(stream_id = shared.id, copied, "read satisfied from buffer");
            drop(shared);
            cb(buf, Ok(copied));
            return;
        }

        if let Some(reason) = shared.close_reason {
            drop(shared);
            cb(buf, Err(reason));
            return;
        }
        if shared.pending_read.is_some() {
            drop(shared);
            cb(buf, Err(StreamError::StreamIsReading));
            return;
        }
        if !shared.is_readable {
            drop(shared);
            cb(buf, Err(StreamError::StreamNotReadable));
            return;
        }

        let filled = shared.read_buffer.consume(&mut buf[..n]);
        Self::ack_drained(&mut shared, filled as u32);
        shared.pending_read = Some(PendingRead {
            buf,
            requested: n,
            filled,
            accept_partial,
            callback: cb,
        });
        trace!(stream_id = shared.id, filled, requested = n, "read pending");
    }

    /// Credit `n` freshly-drained bytes back to the peer, if the stream is
    /// still readable. Shared by the immediate-completion and
    /// install-partial paths of `read`/`read_some`.
    fn ack_drained(shared: &mut StreamShared, n: u32) {
        if n > 0 && shared.is_readable {
            shared.receive_window += n;
            shared.feedback.ack_received_bytes(shared.id, n);
            Self::check_pending_window_adjust(shared);
        }
    }

    /// Fire a latched `adjust_window_size` callback once `receive_window`
    /// has caught up to its target. With the eager-credit policy used here
    /// that's always true by the time this is first called, but the latch
    /// stays in place for a future policy that credits the peer gradually.
    fn check_pending_window_adjust(shared: &mut StreamShared) {
        let satisfied = match &shared.pending_window_adjust {
            Some(p) => shared.receive_window >= p.target,
            None => false,
        };
        if satisfied {
            if let Some(adjust) = shared.pending_window_adjust.take() {
                (adjust.callback)(Ok(()));
            }
        }
    }

    /// Write exactly the first `n` bytes of `data`. `cb` fires once all `n`
    /// bytes have been acked by the peer.
    pub fn write(&self, data: Bytes, n: usize, cb: WriteCallback) {
        self.write_impl(data, n, false, cb);
    }

    /// Write the first `n` bytes of `data`, but let `cb` fire as soon as any
    /// prefix of them has been acked; any remainder never sent is discarded
    /// rather than kept pending.
    pub fn write_some(&self, data: Bytes, n: usize, cb: WriteCallback) {
        self.write_impl(data, n, true, cb);
    }

    fn write_impl(&self, data: Bytes, n: usize, some: bool, cb: WriteCallback) {
        let cb = self.wrap_unary(cb);

        if n == 0 || data.len() < n {
            cb(Err(StreamError::InvalidArgument));
            return;
        }
        let chunk = data.slice(0..n);

        let mut shared = self.0.borrow_mut();
        if let Some(reason) = shared.close_reason {
            drop(shared);
            cb(Err(reason));
            return;
        }
        if !shared.is_writable {
            drop(shared);
            cb(Err(StreamError::StreamNotWritable));
            return;
        }
        if !shared.write_queue.can_enqueue(n) {
            drop(shared);
            cb(Err(StreamError::StreamWriteBufferOverflow));
            return;
        }

        shared.write_queue.enqueue(chunk, some, cb);
        Self::do_write(&mut shared);
    }

    /// Drain as much of the write queue as the current send window allows,
    /// handing each dequeued chunk to the muxer. Once the queue empties with
    /// the write half closed, emits the FIN signal (once) and, if the stream
    /// is already unreadable too, fully closes it.
    fn do_write(shared: &mut StreamShared) {
        while let Some((slice, some, new_credit)) = shared.write_queue.dequeue(shared.send_window)
        {
            shared.send_window = new_credit;
            shared
                .feedback
                .write_stream_data(shared.id, slice, some);
        }

        if !shared.is_writable
            && !shared.fin_emitted
            && shared.close_reason.is_none()
            && shared.write_queue.is_empty()
        {
            shared.fin_emitted = true;
            debug!(stream_id = shared.id, "write half drained, emitting FIN");
            shared.feedback.stream_closed(shared.id);
            if !shared.is_readable {
                Self::do_close(shared, StreamError::StreamClosedByHost);
            } else {
                shared.receive_window = shared.max_window;
            }
        }
    }

    /// Close the write half. `cb` fires once the close completes: with
    /// `Ok(())` for a clean host-initiated close, or the actual
    /// `close_reason` otherwise (peer RST, receive overflow, etc). Calling
    /// `close` again before the first callback has fired replaces it; the
    /// replaced callback is dropped, never invoked.
    pub fn close(&self, cb: CloseCallback) {
        let cb = self.wrap_close(cb);
        let mut shared = self.0.borrow_mut();

        if let Some(reason) = shared.close_reason {
            drop(shared);
            let result = if reason.is_clean_host_close() {
                Ok(())
            } else {
                Err(reason)
            };
            cb(result);
            return;
        }

        shared.pending_close = Some(cb);
        shared.is_writable = false;
        Self::do_write(&mut shared);
    }

    /// Grow the receive window to `new_size`. `new_size` must lie in
    /// `[receive_window, max_window]`. `cb` fires once the peer has been
    /// credited and the window has reached `new_size`, or immediately with
    /// the close reason if the stream closes first. A second call before the
    /// first's callback fires replaces it silently.
    pub fn adjust_window_size(&self, new_size: u32, cb: WindowAdjustCallback) {
        let cb = self.wrap_window_adjust(cb);
        let mut shared = self.0.borrow_mut();

        if let Some(reason) = shared.close_reason {
            drop(shared);
            cb(Err(reason));
            return;
        }
        if new_size > shared.max_window || new_size < shared.receive_window {
            drop(shared);
            cb(Err(StreamError::InvalidWindowSize));
            return;
        }

        let delta = new_size - shared.receive_window;
        if delta > 0 {
            shared.receive_window = new_size;
            shared.feedback.ack_received_bytes(shared.id, delta);
        }

        if shared.receive_window >= new_size {
            shared.pending_window_adjust = None;
            drop(shared);
            cb(Ok(()));
        } else {
            // Unreachable with the eager-credit policy above (receive_window
            // always reaches new_size in the same call), kept so a future
            // rate-limited credit policy has somewhere to latch onto.
            shared.pending_window_adjust = Some(PendingWindowAdjust {
                target: new_size,
                callback: cb,
            });
        }
    }

    /// Terminate the stream unilaterally: send RST, drop every stored
    /// callback (read, close, window-adjust, and every queued write) without
    /// invoking any of them, and stop scheduling any callback that was
    /// already in flight. Idempotent.
    pub fn reset(&self) {
        self.reset_with_reason(StreamError::StreamResetByHost);
    }

    fn reset_with_reason(&self, reason: StreamError) {
        let mut shared = self.0.borrow_mut();
        if shared.no_more_callbacks {
            return;
        }
        warn!(stream_id = shared.id, ?reason, "stream reset");
        shared.no_more_callbacks = true;
        shared.is_readable = false;
        shared.is_writable = false;
        if shared.close_reason.is_none() {
            shared.close_reason = Some(reason);
        }
        shared.pending_read = None;
        shared.pending_close = None;
        shared.pending_window_adjust = None;
        shared.read_buffer.clear();
        shared.write_queue.clear();
        let id = shared.id;
        shared.feedback.reset_stream(id);
    }

    // -- ingress: calls the muxer makes on this stream -----------------------

    /// The muxer delivers `bytes` read off the wire for this stream, along
    /// with whether the frame carried FIN and/or RST. Returns what the muxer
    /// should do with the stream afterwards.
    pub fn on_data_read(&self, bytes: Bytes, fin: bool, rst: bool) -> Directive {
        let mut shared = self.0.borrow_mut();
        let mut delivered_directly = 0u32;

        if !bytes.is_empty() {
            shared.receive_window = shared.receive_window.saturating_sub(bytes.len() as u32);

            if let Some(mut pending) = shared.pending_read.take() {
                let dst = &mut pending.buf[pending.filled..pending.requested];
                let copied = shared.read_buffer.add_and_consume(bytes, dst);
                pending.filled += copied;
                delivered_directly = copied as u32;
                let done = if pending.accept_partial {
                    pending.filled > 0
                } else {
                    pending.filled == pending.requested
                };
                if done {
                    (pending.callback)(pending.buf, Ok(pending.filled));
                } else {
                    shared.pending_read = Some(pending);
                }
            } else {
                shared.read_buffer.add(bytes);
            }
        }

        let overflow = shared.receive_window < shared.read_buffer.size() as u32;

        if shared.close_reason.is_some() {
            return Directive::RemoveAndSendRst;
        }

        if rst {
            Self::do_close(&mut shared, StreamError::StreamResetByPeer);
            return Directive::Remove;
        }

        if fin {
            shared.is_readable = false;
            if !shared.is_writable {
                Self::do_close(&mut shared, StreamError::StreamClosedByHost);
                return Directive::Remove;
            }
            return Directive::Keep;
        }

        if overflow {
            Self::do_close(&mut shared, StreamError::ReceiveWindowOverflow);
            return Directive::RemoveAndSendRst;
        }

        if delivered_directly > 0 && shared.is_readable {
            shared.receive_window += delivered_directly;
            shared
                .feedback
                .ack_received_bytes(shared.id, delivered_directly);
            Self::check_pending_window_adjust(&mut shared);
        }

        Directive::Keep
    }

    /// The muxer reports that `n` bytes previously dequeued via `do_write`
    /// have actually been framed and handed to the wire. If the accounting
    /// doesn't add up, resets the stream rather than drifting silently.
    pub fn on_data_written(&self, n: u32) {
        let mut shared = self.0.borrow_mut();
        let ok = shared.write_queue.ack(n);
        if !ok {
            drop(shared);
            self.reset_with_reason(StreamError::InternalError(
                "on_data_written acked more bytes than were dequeued",
            ));
            return;
        }
        // Acking the head entry may have popped it, freeing up credit and
        // exposing the next queued write; drain again so it doesn't sit
        // forever waiting for an unrelated write()/increase_send_window().
        Self::do_write(&mut shared);
    }

    /// The peer raised our send window by `delta`, via a `WINDOW_UPDATE`
    /// frame. Resumes draining the write queue.
    pub fn increase_send_window(&self, delta: u32) {
        let mut shared = self.0.borrow_mut();
        shared.send_window = shared.send_window.saturating_add(delta);
        Self::do_write(&mut shared);
    }

    /// The underlying connection is gone. Fully closes the stream with
    /// `reason`, notifying every pending callback (including a pending read).
    pub fn closed_by_connection(&self, reason: StreamError) {
        let mut shared = self.0.borrow_mut();
        Self::do_close(&mut shared, reason);
    }

    /// Shared teardown for every non-`reset` close path: RST from the peer,
    /// receive-window overflow, a clean local close completing after the
    /// peer already FIN'd, an internal accounting failure, or the underlying
    /// connection going away. `close_reason` is write-once; a second call is
    /// a no-op.
    fn do_close(shared: &mut StreamShared, reason: StreamError) {
        if shared.close_reason.is_some() {
            return;
        }
        shared.close_reason = Some(reason);
        shared.is_readable = false;
        shared.is_writable = false;
        debug!(stream_id = shared.id, ?reason, "stream closing");

        if let Some(pending) = shared.pending_read.take() {
            shared.read_buffer.clear();
            (pending.callback)(pending.buf, Err(reason));
        }

        if let Some(cb) = shared.pending_close.take() {
            let result = if reason.is_clean_host_close() {
                Ok(())
            } else {
                Err(reason)
            };
            cb(result);
        }

        if let Some(adjust) = shared.pending_window_adjust.take() {
            (adjust.callback)(Err(reason));
        }

        shared.write_queue.broadcast(|cb| {
            cb(Err(reason));
            true
        });
        shared.write_queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[derive(Default)]
    struct RecordedCalls {
        writes: Vec<(u32, Vec<u8>, bool)>,
        acks: Vec<(u32, u32)>,
        closed: Vec<u32>,
        reset: Vec<u32>,
        deferred: Vec<Box<dyn FnOnce()>>,
    }

    #[derive(Default)]
    struct TestFeedback(StdRefCell<RecordedCalls>);

    impl TestFeedback {
        fn run_deferred(&self) {
            let thunks = std::mem::take(&mut self.0.borrow_mut().deferred);
            for thunk in thunks {
                thunk();
            }
        }
    }

    impl StreamFeedback for TestFeedback {
        fn write_stream_data(&self, stream_id: u32, bytes: Bytes, some: bool) {
            self.0
                .borrow_mut()
                .writes
                .push((stream_id, bytes.to_vec(), some));
        }
        fn ack_received_bytes(&self, stream_id: u32, n: u32) {
            self.0.borrow_mut().acks.push((stream_id, n));
        }
        fn stream_closed(&self, stream_id: u32) {
            self.0.borrow_mut().closed.push(stream_id);
        }
        fn reset_stream(&self, stream_id: u32) {
            self.0.borrow_mut().reset.push(stream_id);
        }
        fn defer_call(&self, thunk: Box<dyn FnOnce()>) {
            self.0.borrow_mut().deferred.push(thunk);
        }
    }

    struct TestConnection;
    impl ConnectionInfo for TestConnection {
        fn remote_peer_id(&self) -> Result<String, ConnectionError> {
            Ok("peer".into())
        }
        fn is_initiator(&self) -> Result<bool, ConnectionError> {
            Ok(true)
        }
        fn local_multiaddr(&self) -> Result<String, ConnectionError> {
            Ok("/memory/local".into())
        }
        fn remote_multiaddr(&self) -> Result<String, ConnectionError> {
            Ok("/memory/remote".into())
        }
    }

    fn new_stream(feedback: &Rc<TestFeedback>) -> Stream {
        Stream::new(
            1,
            Rc::new(TestConnection),
            Rc::clone(feedback) as Rc<dyn StreamFeedback>,
            Config::new(256, 256, 256).unwrap(),
        )
    }

    #[test]
    fn echo_round_trip_matches_scenario_one() {
        let feedback = Rc::new(TestFeedback::default());
        let stream = new_stream(&feedback);

        let write_result = Rc::new(StdRefCell::new(None));
        {
            let write_result = Rc::clone(&write_result);
            stream.write(Bytes::from_static(b"hello"), 5, Box::new(move |r| *write_result.borrow_mut() = Some(r)));
        }
        assert_eq!(feedback.0.borrow().writes, vec![(1, b"hello".to_vec(), false)]);
        assert!(write_result.borrow().is_none());

        stream.on_data_written(5);
        feedback.run_deferred();
        assert_eq!(*write_result.borrow(), Some(Ok(5)));

        let read_result = Rc::new(StdRefCell::new(None));
        {
            let read_result = Rc::clone(&read_result);
            stream.read(vec![0u8; 5], 5, Box::new(move |buf, r| *read_result.borrow_mut() = Some((buf, r))));
        }
        assert!(read_result.borrow().is_none());

        let directive = stream.on_data_read(Bytes::from_static(b"hello"), false, false);
        assert_eq!(directive, Directive::Keep);
        feedback.run_deferred();
        let (buf, r) = read_result.borrow_mut().take().unwrap();
        assert_eq!(r, Ok(5));
        assert_eq!(&buf, b"hello");
        assert_eq!(stream.0.borrow().receive_window, 256);
    }

    #[test]
    fn receive_window_overflow_resets_and_sends_rst() {
        let feedback = Rc::new(TestFeedback::default());
        let stream = Stream::new(
            1,
            Rc::new(TestConnection),
            Rc::clone(&feedback) as Rc<dyn StreamFeedback>,
            Config::new(4, 4, 64).unwrap(),
        );

        let directive = stream.on_data_read(Bytes::from_static(b"abcde"), false, false);
        assert_eq!(directive, Directive::RemoveAndSendRst);
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn peer_rst_completes_pending_read_with_error() {
        let feedback = Rc::new(TestFeedback::default());
        let stream = new_stream(&feedback);

        let read_result = Rc::new(StdRefCell::new(None));
        {
            let read_result = Rc::clone(&read_result);
            stream.read(vec![0u8; 10], 10, Box::new(move |buf, r| *read_result.borrow_mut() = Some((buf, r))));
        }

        let directive = stream.on_data_read(Bytes::new(), false, true);
        assert_eq!(directive, Directive::Remove);
        feedback.run_deferred();
        let (_, r) = read_result.borrow_mut().take().unwrap();
        assert_eq!(r, Err(StreamError::StreamResetByPeer));
    }

    #[test]
    fn local_close_then_remote_fin_completes_cleanly() {
        let feedback = Rc::new(TestFeedback::default());
        let stream = new_stream(&feedback);

        let close_result = Rc::new(StdRefCell::new(None));
        {
            let close_result = Rc::clone(&close_result);
            stream.close(Box::new(move |r| *close_result.borrow_mut() = Some(r)));
        }
        assert_eq!(feedback.0.borrow().closed, vec![1]);
        assert!(close_result.borrow().is_none());

        let directive = stream.on_data_read(Bytes::new(), true, false);
        assert_eq!(directive, Directive::Remove);
        feedback.run_deferred();
        assert_eq!(*close_result.borrow(), Some(Ok(())));
        assert!(stream.is_closed());
    }

    #[test]
    fn reset_drops_callbacks_without_invoking_them() {
        let feedback = Rc::new(TestFeedback::default());
        let stream = new_stream(&feedback);

        let fired = Rc::new(StdRefCell::new(false));
        {
            let fired = Rc::clone(&fired);
            stream.read(vec![0u8; 4], 4, Box::new(move |_, _| *fired.borrow_mut() = true));
        }

        stream.reset();
        feedback.run_deferred();
        assert!(!*fired.borrow());
        assert_eq!(feedback.0.borrow().reset, vec![1]);

        // second reset is a no-op, no second RST
        stream.reset();
        assert_eq!(feedback.0.borrow().reset, vec![1]);
    }

    #[test]
    fn write_queue_gated_by_send_window() {
        let feedback = Rc::new(TestFeedback::default());
        let stream = Stream::new(
            1,
            Rc::new(TestConnection),
            Rc::clone(&feedback) as Rc<dyn StreamFeedback>,
            Config::new(4, 4, 64).unwrap(),
        );

        stream.write(Bytes::from_static(b"abcdefgh"), 8, Box::new(|_| {}));
        assert_eq!(feedback.0.borrow().writes, vec![(1, b"abcd".to_vec(), false)]);

        stream.on_data_written(4);
        stream.increase_send_window(4);
        assert_eq!(
            feedback.0.borrow().writes,
            vec![(1, b"abcd".to_vec(), false), (1, b"efgh".to_vec(), false)]
        );
    }

    #[test]
    fn second_queued_write_drains_after_first_is_acked() {
        // Reproduces the liveness bug where a second write enqueued while an
        // earlier, already-fully-dequeued-but-unacked entry still occupies
        // the head of the queue would never get drained: its own do_write()
        // call (from write_impl) sees the still-present head entry and bails
        // out immediately, and on_data_written used to just ack without
        // re-draining.
        let feedback = Rc::new(TestFeedback::default());
        let stream = new_stream(&feedback);

        stream.write(Bytes::from_static(b"AAAAAAAAAA"), 10, Box::new(|_| {}));
        stream.write(Bytes::from_static(b"BBBBBBBBBB"), 10, Box::new(|_| {}));

        // Only A went out: B's do_write() found A still at the head, unacked.
        assert_eq!(
            feedback.0.borrow().writes,
            vec![(1, b"AAAAAAAAAA".to_vec(), false)]
        );

        stream.on_data_written(10);

        // Acking A must pop it and resume draining so B goes out too.
        assert_eq!(
            feedback.0.borrow().writes,
            vec![
                (1, b"AAAAAAAAAA".to_vec(), false),
                (1, b"BBBBBBBBBB".to_vec(), false)
            ]
        );
    }

    #[test]
    fn double_read_while_pending_is_rejected() {
        let feedback = Rc::new(TestFeedback::default());
        let stream = new_stream(&feedback);

        stream.read(vec![0u8; 4], 4, Box::new(|_, _| {}));

        let second = Rc::new(StdRefCell::new(None));
        {
            let second = Rc::clone(&second);
            stream.read(vec![0u8; 4], 4, Box::new(move |buf, r| *second.borrow_mut() = Some((buf, r))));
        }
        feedback.run_deferred();
        let (_, r) = second.borrow_mut().take().unwrap();
        assert_eq!(r, Err(StreamError::StreamIsReading));
    }
}
