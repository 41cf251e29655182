//! Ordered-response serializer.
//!
//! Responses are assigned a monotonic issue ordinal (`write_seq`) at
//! request-handling time, but complete asynchronously in arbitrary order.
//! The sequencer restores issue order: a completed response is released to
//! the transport only when every lower ordinal has been released, with a
//! min-heap holding the out-of-order completions in between.
//!
//! The sequencer is pure bookkeeping (no I/O): `submit` returns the buffers
//! that just became writable, in ordinal order, and the connection task
//! writes them. The connection task is the only caller, so access is
//! single-threaded by construction.
//!
//! # Invariants
//!
//! - Every pending entry's ordinal is strictly greater than
//!   `expected_resp_no`.
//! - The concatenation of released buffers is ordered by ordinal with no
//!   gaps or duplicates.

use std::{cmp::Reverse, collections::BinaryHeap};

use bytes::Bytes;

use crate::error::ServerError;

/// Completed response waiting for its predecessors.
///
/// Ordered (and compared) by ordinal alone; the buffer is cargo.
#[derive(Debug)]
struct PendingWrite {
    order: i64,
    buf: Bytes,
}

impl PartialEq for PendingWrite {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl Eq for PendingWrite {}

impl Ord for PendingWrite {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.order.cmp(&other.order)
    }
}

impl PartialOrd for PendingWrite {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-connection response reordering buffer.
#[derive(Debug, Default)]
pub struct ResponseSequencer {
    expected_resp_no: i64,
    pending: BinaryHeap<Reverse<PendingWrite>>,
}

impl ResponseSequencer {
    /// Create a sequencer expecting ordinal 0 first.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a completed response and collect everything now writable.
    ///
    /// # Errors
    ///
    /// [`ServerError::CounterWrapped`] when `expected_resp_no` would wrap
    /// past the minimum signed 64-bit value. Fatal to the connection.
    pub fn submit(&mut self, order: i64, buf: Bytes) -> Result<Vec<Bytes>, ServerError> {
        let mut ready = Vec::new();

        if order == self.expected_resp_no {
            ready.push(buf);
            self.advance()?;
        } else {
            debug_assert!(order > self.expected_resp_no, "ordinal released twice");
            self.pending.push(Reverse(PendingWrite { order, buf }));
        }

        while self
            .pending
            .peek()
            .is_some_and(|Reverse(top)| top.order == self.expected_resp_no)
        {
            if let Some(Reverse(top)) = self.pending.pop() {
                ready.push(top.buf);
                self.advance()?;
            }
        }

        Ok(ready)
    }

    /// Number of completed responses still held back by a gap.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Next ordinal eligible to hit the wire.
    #[must_use]
    pub fn expected_resp_no(&self) -> i64 {
        self.expected_resp_no
    }

    fn advance(&mut self) -> Result<(), ServerError> {
        self.expected_resp_no = self.expected_resp_no.wrapping_add(1);
        if self.expected_resp_no == i64::MIN {
            tracing::error!("int wrapped!");
            return Err(ServerError::CounterWrapped);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(tag: u8) -> Bytes {
        Bytes::copy_from_slice(&[tag])
    }

    #[test]
    fn in_order_submissions_release_immediately() {
        let mut seq = ResponseSequencer::new();

        assert_eq!(seq.submit(0, buf(0)).unwrap(), vec![buf(0)]);
        assert_eq!(seq.submit(1, buf(1)).unwrap(), vec![buf(1)]);
        assert_eq!(seq.pending_len(), 0);
    }

    #[test]
    fn out_of_order_completions_release_in_issue_order() {
        // Three responses issued as 0, 1, 2; persistence completes 2, 0, 1.
        let mut seq = ResponseSequencer::new();

        assert_eq!(seq.submit(2, buf(2)).unwrap(), Vec::<Bytes>::new());
        assert_eq!(seq.pending_len(), 1);

        assert_eq!(seq.submit(0, buf(0)).unwrap(), vec![buf(0)]);
        assert_eq!(seq.submit(1, buf(1)).unwrap(), vec![buf(1), buf(2)]);
        assert_eq!(seq.pending_len(), 0);
        assert_eq!(seq.expected_resp_no(), 3);
    }

    #[test]
    fn reversed_burst_drains_in_one_release() {
        let mut seq = ResponseSequencer::new();

        for order in (1..8).rev() {
            assert!(seq.submit(order, buf(order as u8)).unwrap().is_empty());
        }

        let released = seq.submit(0, buf(0)).unwrap();
        let tags: Vec<u8> = released.iter().map(|b| b[0]).collect();
        assert_eq!(tags, (0..8).collect::<Vec<u8>>());
    }

    #[test]
    fn gap_holds_later_completions() {
        let mut seq = ResponseSequencer::new();

        assert_eq!(seq.submit(0, buf(0)).unwrap(), vec![buf(0)]);
        assert!(seq.submit(2, buf(2)).unwrap().is_empty());
        assert!(seq.submit(3, buf(3)).unwrap().is_empty());
        assert_eq!(seq.pending_len(), 2);

        assert_eq!(seq.submit(1, buf(1)).unwrap(), vec![buf(1), buf(2), buf(3)]);
    }

    #[test]
    fn ordinal_wrap_is_fatal() {
        let mut seq = ResponseSequencer { expected_resp_no: i64::MAX, pending: BinaryHeap::new() };

        assert!(matches!(
            seq.submit(i64::MAX, buf(0)),
            Err(ServerError::CounterWrapped)
        ));
    }
}
