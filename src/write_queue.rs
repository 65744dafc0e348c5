//! The bounded FIFO of outbound chunks gated by send-window credit.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use std::collections::VecDeque;

use bytes::Bytes;

use crate::error::StreamError;

/// Completion callback for one enqueued write. Receives the number of bytes
/// actually acked for `write_some` entries, or the full entry length for
/// `write` entries; `Err` on failure (broadcast, or a closed stream).
pub type WriteCallback = Box<dyn FnOnce(Result<usize, StreamError>)>;

struct Entry {
    /// Bytes not yet handed to [`WriteQueue::dequeue`].
    data: Bytes,
    /// Original length of this entry, for window/limit accounting.
    total_len: usize,
    /// Bytes dequeued so far but not yet acked.
    in_flight: usize,
    /// Bytes acked so far.
    acked: usize,
    /// `true` for `write_some` (fires on first ack), `false` for `write`
    /// (fires only once the whole entry is acked).
    some: bool,
    /// Set the first time this entry is handed out by [`WriteQueue::dequeue`].
    /// A `some` entry is dequeued at most once: whatever slice the available
    /// credit afforded is the only one it will ever send, and completion is
    /// gated on this flag so an entry that hasn't been dequeued yet can never
    /// be mistaken for one whose single in-flight slice has been fully acked.
    dequeued: bool,
    callback: Option<WriteCallback>,
}

/// Bounded FIFO of outbound byte chunks awaiting transmission and
/// acknowledgement.
///
/// Adapted from a single in-flight byte counter to a full entry queue,
/// because the `write`/`write_some` contract needs a per-call completion
/// callback rather than one counter shared across every outstanding write.
pub struct WriteQueue {
    entries: VecDeque<Entry>,
    /// Sum of `total_len - acked` across all entries: bytes this queue is
    /// still answerable for, whether dequeued or not.
    pending: usize,
    /// Sum of `in_flight` across all entries: bytes dequeued but not yet
    /// acked. Used to validate `ack(n)`.
    outstanding: usize,
    limit: usize,
}

impl WriteQueue {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            pending: 0,
            outstanding: 0,
            limit,
        }
    }

    /// True iff enqueuing `n` more bytes would keep total pending bytes
    /// within `limit`.
    #[must_use]
    pub fn can_enqueue(&self, n: usize) -> bool {
        self.pending.saturating_add(n) <= self.limit
    }

    /// Append a new entry. Caller must have checked [`Self::can_enqueue`]
    /// first; this does not re-check the limit.
    pub fn enqueue(&mut self, bytes: Bytes, some: bool, callback: WriteCallback) {
        let total_len = bytes.len();
        self.pending += total_len;
        self.entries.push_back(Entry {
            data: bytes,
            total_len,
            in_flight: 0,
            acked: 0,
            some,
            dequeued: false,
            callback: Some(callback),
        });
    }

    /// Return the next sliceable prefix of the head entry, at most `credit`
    /// bytes. Returns `None` if there is nothing dequeueable right now
    /// (queue empty, the head entry has already been fully dequeued and is
    /// only waiting on its ack, or the head entry is a `write_some` entry
    /// that has already had its one and only slice dequeued).
    pub fn dequeue(&mut self, credit: u32) -> Option<(Bytes, bool, u32)> {
        if credit == 0 {
            return None;
        }
        let entry = self.entries.front_mut()?;
        if entry.data.is_empty() {
            return None;
        }
        let k = (credit as usize).min(entry.data.len());
        let slice = entry.data.split_to(k);
        entry.in_flight += k;
        entry.dequeued = true;
        self.outstanding += k;
        if entry.some {
            // A write_some entry sends at most one slice: whatever credit
            // affords right now. Any remainder is never dequeued, so later
            // credit (e.g. a subsequent increase_send_window) can't pull more
            // of this entry out from under an ack that's already in flight.
            entry.data = Bytes::new();
        }
        Some((slice, entry.some, credit - k as u32))
    }

    /// Account `n` bytes as committed to the wire, completing callbacks
    /// whose bytes are now covered, in FIFO order. Returns `false` if `n`
    /// exceeds the outstanding dequeued-not-yet-acked total, in which case
    /// no state is mutated — the caller should treat this as an accounting
    /// bug and reset the stream.
    pub fn ack(&mut self, n: u32) -> bool {
        let mut remaining = n as usize;
        if remaining > self.outstanding {
            return false;
        }
        self.outstanding -= remaining;
        while remaining > 0 {
            let Some(entry) = self.entries.front_mut() else {
                // `outstanding` said there was more to ack than the queue
                // actually holds: an invariant violation, not a normal case.
                return false;
            };
            let take = remaining.min(entry.in_flight);
            entry.in_flight -= take;
            entry.acked += take;
            self.pending -= take;
            remaining -= take;

            let complete = if entry.some {
                // Only the entry's one dequeued slice is ever in flight, so
                // `in_flight` reaching zero means that whole slice has now
                // been acked, not merely that some prefix of it has.
                entry.dequeued && entry.in_flight == 0
            } else {
                entry.acked == entry.total_len
            };
            if complete {
                let mut entry = self.entries.pop_front().expect("front just matched");
                // A `write_some` entry may complete with bytes still
                // unaccounted for (never dequeued) — those are discarded,
                // not sent.
                let leftover = entry.total_len - entry.acked;
                self.pending -= leftover;
                self.outstanding -= entry.in_flight;
                if let Some(cb) = entry.callback.take() {
                    cb(Ok(entry.acked));
                }
            }
        }
        true
    }

    /// Invoke `f` with each still-pending entry's callback, in FIFO order,
    /// popping the entry as it goes. Stops as soon as `f` returns `false`.
    /// Does not touch `pending`/`outstanding` accounting — call [`Self::clear`]
    /// afterwards to fully empty the queue.
    pub fn broadcast(&mut self, mut f: impl FnMut(WriteCallback) -> bool) {
        while let Some(mut entry) = self.entries.pop_front() {
            if let Some(cb) = entry.callback.take() {
                if !f(cb) {
                    break;
                }
            }
        }
    }

    /// Discard all entries without invoking any callback.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending = 0;
        self.outstanding = 0;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recording_cb(log: &Rc<RefCell<Vec<Result<usize, StreamError>>>>) -> WriteCallback {
        let log = Rc::clone(log);
        Box::new(move |r| log.borrow_mut().push(r))
    }

    #[test]
    fn can_enqueue_respects_limit() {
        let q = WriteQueue::new(8);
        assert!(q.can_enqueue(8));
        assert!(!q.can_enqueue(9));
    }

    #[test]
    fn full_write_waits_for_total_ack() {
        let mut q = WriteQueue::new(64);
        let log = Rc::new(RefCell::new(Vec::new()));
        q.enqueue(Bytes::from_static(b"abcdef"), false, recording_cb(&log));

        let (slice, some, credit) = q.dequeue(3).unwrap();
        assert_eq!(&slice[..], b"abc");
        assert!(!some);
        assert_eq!(credit, 0);
        assert!(q.ack(3));
        assert!(log.borrow().is_empty());

        let (slice2, _, _) = q.dequeue(3).unwrap();
        assert_eq!(&slice2[..], b"def");
        assert!(q.ack(3));
        assert_eq!(log.borrow().as_slice(), &[Ok(6)]);
    }

    #[test]
    fn write_some_fires_on_first_partial_ack() {
        let mut q = WriteQueue::new(64);
        let log = Rc::new(RefCell::new(Vec::new()));
        q.enqueue(Bytes::from_static(b"abcdef"), true, recording_cb(&log));

        let (slice, some, _) = q.dequeue(2).unwrap();
        assert_eq!(&slice[..], b"ab");
        assert!(some);
        assert!(q.ack(2));
        assert_eq!(log.borrow().as_slice(), &[Ok(2)]);
        // the remaining 4 bytes were discarded, not left pending forever
        assert!(q.is_empty());
    }

    #[test]
    fn dequeue_gated_by_credit() {
        let mut q = WriteQueue::new(64);
        let log = Rc::new(RefCell::new(Vec::new()));
        q.enqueue(Bytes::from_static(b"abcdef"), false, recording_cb(&log));
        assert!(q.dequeue(0).is_none());
        let (slice, _, credit) = q.dequeue(100).unwrap();
        assert_eq!(&slice[..], b"abcdef");
        assert_eq!(credit, 94);
        // head entry is now fully dequeued but unacked: no more to hand out
        assert!(q.dequeue(10).is_none());
    }

    #[test]
    fn ack_rejects_overcommit() {
        let mut q = WriteQueue::new(64);
        let log = Rc::new(RefCell::new(Vec::new()));
        q.enqueue(Bytes::from_static(b"abc"), false, recording_cb(&log));
        q.dequeue(3).unwrap();
        assert!(!q.ack(4));
        assert!(q.ack(3));
    }

    #[test]
    fn fifo_ordering_across_entries() {
        let mut q = WriteQueue::new(64);
        let log = Rc::new(RefCell::new(Vec::new()));
        q.enqueue(Bytes::from_static(b"aa"), false, recording_cb(&log));
        q.enqueue(Bytes::from_static(b"bb"), false, recording_cb(&log));
        q.dequeue(2).unwrap();
        q.dequeue(2).unwrap();
        assert!(q.ack(4));
        assert_eq!(log.borrow().as_slice(), &[Ok(2), Ok(2)]);
    }

    #[test]
    fn broadcast_fires_all_in_fifo_order_then_stops_on_false() {
        let mut q = WriteQueue::new(64);
        let log = Rc::new(RefCell::new(Vec::new()));
        q.enqueue(Bytes::from_static(b"a"), false, recording_cb(&log));
        q.enqueue(Bytes::from_static(b"b"), false, recording_cb(&log));
        q.enqueue(Bytes::from_static(b"c"), false, recording_cb(&log));

        let mut calls = 0;
        q.broadcast(|cb| {
            cb(Err(StreamError::StreamResetByHost));
            calls += 1;
            calls < 2
        });
        assert_eq!(
            log.borrow().as_slice(),
            &[
                Err(StreamError::StreamResetByHost),
                Err(StreamError::StreamResetByHost)
            ]
        );
        // third entry is still sitting in the queue, never invoked
        assert!(!q.is_empty());
        q.clear();
        assert!(q.is_empty());
    }

    #[test]
    fn clear_drops_without_invoking_callbacks() {
        let mut q = WriteQueue::new(64);
        let log = Rc::new(RefCell::new(Vec::new()));
        q.enqueue(Bytes::from_static(b"abc"), false, recording_cb(&log));
        q.clear();
        assert!(log.borrow().is_empty());
        assert!(q.can_enqueue(64));
    }

    #[test]
    fn write_some_never_dequeues_a_second_slice() {
        let mut q = WriteQueue::new(64);
        let log = Rc::new(RefCell::new(Vec::new()));
        q.enqueue(Bytes::from_static(b"abcdef"), true, recording_cb(&log));

        // Credit only covers a prefix; the rest must not be dequeueable later,
        // even once more credit becomes available before any ack arrives.
        let (slice, _, _) = q.dequeue(2).unwrap();
        assert_eq!(&slice[..], b"ab");
        assert!(q.dequeue(10).is_none());

        // The ack for just the one slice that went out completes the entry
        // without tripping an outstanding-bytes mismatch.
        assert!(q.ack(2));
        assert_eq!(log.borrow().as_slice(), &[Ok(2)]);
    }

    #[test]
    fn write_some_completion_waits_for_full_slice_ack() {
        let mut q = WriteQueue::new(64);
        let log = Rc::new(RefCell::new(Vec::new()));
        q.enqueue(Bytes::from_static(b"abcd"), true, recording_cb(&log));

        q.dequeue(4).unwrap();
        // A partial ack of the one in-flight slice must not fire the
        // callback or drop the rest of its outstanding accounting.
        assert!(q.ack(1));
        assert!(log.borrow().is_empty());
        assert!(!q.is_empty());

        assert!(q.ack(3));
        assert_eq!(log.borrow().as_slice(), &[Ok(4)]);
    }
}
