//! Sliding-window frame queue.
//!
//! A fixed ring of up to seven slots backs both halves of the transmit
//! pipeline: a slot is *queued* from the moment a payload is accepted
//! until its first emission, then *outstanding* until the peer
//! acknowledges it. Sequence numbers are assigned at push time and never
//! reassigned, so the ring always covers the contiguous interval
//! `[V(A), V(S))` of the mod-8 sequence space.

use std::time::Instant;

use crate::types::SequenceNumber;

/// One transmit slot.
#[derive(Debug)]
pub struct WindowSlot {
    seq: SequenceNumber,
    payload: Vec<u8>,
    sent: bool,
    retries_left: u8,
    deadline: Option<Instant>,
    expedite: bool,
}

impl WindowSlot {
    fn new(mtu: usize) -> Self {
        Self {
            seq: SequenceNumber::ZERO,
            payload: Vec::with_capacity(mtu),
            sent: false,
            retries_left: 0,
            deadline: None,
            expedite: false,
        }
    }

    /// Assigned N(S).
    pub fn seq(&self) -> SequenceNumber {
        self.seq
    }

    /// User payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether the slot has been emitted at least once.
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Remaining retransmissions before the link declares a loss.
    pub fn retries_left(&self) -> u8 {
        self.retries_left
    }

    /// True when a REJ demanded immediate retransmission.
    pub fn is_expedited(&self) -> bool {
        self.expedite
    }

    /// Record an emission: arm the retransmit deadline, clear expedite.
    pub fn mark_sent(&mut self, deadline: Instant) {
        self.sent = true;
        self.expedite = false;
        self.deadline = Some(deadline);
    }

    /// Consume one retry. Returns false when the budget is exhausted.
    pub fn consume_retry(&mut self) -> bool {
        if self.retries_left == 0 {
            return false;
        }
        self.retries_left -= 1;
        true
    }
}

/// Ring of transmit slots within the sliding window.
#[derive(Debug)]
pub struct FrameWindow {
    slots: Vec<WindowSlot>,
    head: usize,
    count: usize,
    vs: SequenceNumber,
    last_acked: SequenceNumber,
}

impl FrameWindow {
    /// Create a window of `window` slots, each holding up to `mtu` bytes.
    pub fn new(window: usize, mtu: usize) -> Self {
        Self {
            slots: (0..window).map(|_| WindowSlot::new(mtu)).collect(),
            head: 0,
            count: 0,
            vs: SequenceNumber::ZERO,
            last_acked: SequenceNumber::ZERO,
        }
    }

    /// Configured window size.
    pub fn window(&self) -> usize {
        self.slots.len()
    }

    /// Occupied slots (queued plus outstanding).
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    /// Next send sequence number V(S).
    pub fn vs(&self) -> SequenceNumber {
        self.vs
    }

    /// Last acknowledged sequence number V(A).
    pub fn last_acked(&self) -> SequenceNumber {
        self.last_acked
    }

    /// Slots emitted at least once and not yet acknowledged.
    pub fn sent_count(&self) -> usize {
        (0..self.count)
            .take_while(|&i| self.slot(i).sent)
            .count()
    }

    /// Accept a payload and assign it the next N(S).
    ///
    /// Callers must check [`is_full`](Self::is_full) first.
    pub fn push(&mut self, payload: &[u8], retries: u8) -> SequenceNumber {
        debug_assert!(!self.is_full());
        let seq = self.vs;
        let idx = (self.head + self.count) % self.slots.len();
        let slot = &mut self.slots[idx];
        slot.seq = seq;
        slot.payload.clear();
        slot.payload.extend_from_slice(payload);
        slot.sent = false;
        slot.retries_left = retries;
        slot.deadline = None;
        slot.expedite = false;
        self.count += 1;
        self.vs = self.vs.next();
        seq
    }

    /// Process an acknowledgement up to (excluding) `nr`.
    ///
    /// Frees every slot with a sequence in `[V(A), nr)` and advances
    /// V(A). An N(R) whose forward distance from V(A) exceeds the number
    /// of emitted frames is stale or corrupt and is ignored. Returns the
    /// number of slots released.
    pub fn acknowledge(&mut self, nr: SequenceNumber) -> usize {
        let distance = usize::from(self.last_acked.distance_to(nr));
        if distance == 0 || distance > self.sent_count() {
            return 0;
        }
        self.head = (self.head + distance) % self.slots.len();
        self.count -= distance;
        self.last_acked = nr;
        distance
    }

    /// Oldest queued slot that has never been emitted.
    pub fn next_unsent(&mut self) -> Option<&mut WindowSlot> {
        let offset = (0..self.count).find(|&i| !self.slot(i).sent)?;
        let idx = (self.head + offset) % self.slots.len();
        Some(&mut self.slots[idx])
    }

    /// Oldest emitted slot requiring retransmission at `now`.
    pub fn due(&mut self, now: Instant) -> Option<&mut WindowSlot> {
        let offset = (0..self.count).find(|&i| {
            let slot = self.slot(i);
            slot.sent && (slot.expedite || slot.deadline.is_some_and(|d| d <= now))
        })?;
        let idx = (self.head + offset) % self.slots.len();
        Some(&mut self.slots[idx])
    }

    /// Mark every emitted slot from `nr` onwards for immediate
    /// retransmission with a fresh retry budget.
    pub fn expedite_from(&mut self, nr: SequenceNumber, retries: u8) {
        let start = usize::from(self.last_acked.distance_to(nr));
        if start > self.count {
            return;
        }
        for i in start..self.count {
            let idx = (self.head + i) % self.slots.len();
            let slot = &mut self.slots[idx];
            if slot.sent {
                slot.expedite = true;
                slot.retries_left = retries;
            }
        }
    }

    /// Reset the sequence space, keeping payloads that were queued but
    /// never emitted and renumbering them from zero.
    ///
    /// Used when a connection is (re)established: outstanding frames
    /// belong to the dead session, queued user data does not.
    pub fn reset_keep_queued(&mut self) {
        let len = self.slots.len();
        let mut queued: Vec<(Vec<u8>, u8)> = Vec::new();
        for i in 0..self.count {
            let idx = (self.head + i) % len;
            let slot = &mut self.slots[idx];
            if !slot.sent {
                queued.push((std::mem::take(&mut slot.payload), slot.retries_left));
            }
        }

        self.clear();
        for (payload, retries) in queued {
            let slot = &mut self.slots[self.count];
            slot.seq = self.vs;
            slot.payload = payload;
            slot.sent = false;
            slot.retries_left = retries;
            slot.deadline = None;
            slot.expedite = false;
            self.count += 1;
            self.vs = self.vs.next();
        }
    }

    /// Drop everything and reset the sequence space (link reset).
    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
        self.vs = SequenceNumber::ZERO;
        self.last_acked = SequenceNumber::ZERO;
        for slot in &mut self.slots {
            slot.payload.clear();
            slot.sent = false;
            slot.deadline = None;
            slot.expedite = false;
        }
    }

    fn slot(&self, offset: usize) -> &WindowSlot {
        &self.slots[(self.head + offset) % self.slots.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn window(size: usize) -> FrameWindow {
        FrameWindow::new(size, 64)
    }

    #[test]
    fn test_push_assigns_sequential_numbers() {
        let mut w = window(3);
        assert_eq!(w.push(b"a", 2).value(), 0);
        assert_eq!(w.push(b"b", 2).value(), 1);
        assert_eq!(w.push(b"c", 2).value(), 2);
        assert!(w.is_full());
        assert_eq!(w.vs().value(), 3);
    }

    #[test]
    fn test_acknowledge_releases_interval() {
        let now = Instant::now();
        let mut w = window(3);
        for payload in [b"a", b"b", b"c"] {
            w.push(payload, 2);
        }
        for _ in 0..3 {
            w.next_unsent().unwrap().mark_sent(now);
        }

        assert_eq!(w.acknowledge(SequenceNumber::new(2)), 2);
        assert_eq!(w.len(), 1);
        assert_eq!(w.last_acked().value(), 2);

        // Remaining slot keeps its sequence number
        assert_eq!(w.due(now).unwrap().seq().value(), 2);
    }

    #[test]
    fn test_stale_ack_ignored() {
        let now = Instant::now();
        let mut w = window(2);
        w.push(b"a", 2);
        w.next_unsent().unwrap().mark_sent(now);

        // N(R)=5 is far outside the emitted interval
        assert_eq!(w.acknowledge(SequenceNumber::new(5)), 0);
        assert_eq!(w.len(), 1);

        // Acknowledging unsent frames is also refused
        w.push(b"b", 2);
        assert_eq!(w.acknowledge(SequenceNumber::new(2)), 0);
        assert_eq!(w.acknowledge(SequenceNumber::new(1)), 1);
    }

    #[test]
    fn test_sequence_wraparound_across_ring() {
        let now = Instant::now();
        let mut w = window(2);

        // Push and ack ten frames; sequence numbers wrap mod 8
        for i in 0..10u8 {
            let seq = w.push(&[i], 2);
            assert_eq!(seq.value(), i & 7);
            w.next_unsent().unwrap().mark_sent(now);
            assert_eq!(w.acknowledge(seq.next()), 1);
        }
        assert!(w.is_empty());
        assert_eq!(w.vs().value(), 2);
        assert_eq!(w.last_acked().value(), 2);
    }

    #[test]
    fn test_invariant_count_matches_distance() {
        let now = Instant::now();
        let mut w = window(4);
        for i in 0..4u8 {
            w.push(&[i], 2);
            w.next_unsent().unwrap().mark_sent(now);
        }
        w.acknowledge(SequenceNumber::new(3));

        let distance = w.last_acked().distance_to(w.vs());
        assert_eq!(usize::from(distance), w.len());
    }

    #[test]
    fn test_due_respects_deadlines() {
        let now = Instant::now();
        let later = now + Duration::from_millis(100);
        let mut w = window(2);
        w.push(b"a", 2);
        w.push(b"b", 2);
        w.next_unsent().unwrap().mark_sent(later);

        assert!(w.due(now).is_none());
        assert_eq!(w.due(later).unwrap().seq().value(), 0);
    }

    #[test]
    fn test_expedite_from_marks_sent_suffix() {
        let now = Instant::now();
        let later = now + Duration::from_secs(10);
        let mut w = window(3);
        for payload in [b"a", b"b", b"c"] {
            w.push(payload, 1);
        }
        w.next_unsent().unwrap().mark_sent(later);
        w.next_unsent().unwrap().mark_sent(later);

        // REJ with N(R)=1: frame 1 retransmits, frame 2 is still unsent
        w.expedite_from(SequenceNumber::new(1), 3);

        let due = w.due(now).unwrap();
        assert!(due.is_expedited());
        assert_eq!(due.seq().value(), 1);
        assert_eq!(due.retries_left(), 3);
        due.mark_sent(later);

        // Frame 0 was before the REJ point and is not due
        assert!(w.due(now).is_none());
    }

    #[test]
    fn test_consume_retry_budget() {
        let mut w = window(1);
        w.push(b"a", 2);
        let slot = w.next_unsent().unwrap();
        assert!(slot.consume_retry());
        assert!(slot.consume_retry());
        assert!(!slot.consume_retry());
    }

    #[test]
    fn test_reset_keeps_queued_payloads() {
        let now = Instant::now();
        let mut w = window(3);
        w.push(b"sent", 2);
        w.next_unsent().unwrap().mark_sent(now);
        w.push(b"queued-a", 2);
        w.push(b"queued-b", 2);

        w.reset_keep_queued();

        // The outstanding frame is gone; queued ones renumber from zero
        assert_eq!(w.len(), 2);
        assert_eq!(w.vs().value(), 2);
        assert_eq!(w.last_acked(), SequenceNumber::ZERO);

        let first = w.next_unsent().unwrap();
        assert_eq!(first.seq().value(), 0);
        assert_eq!(first.payload(), b"queued-a");
        first.mark_sent(now);
        let second = w.next_unsent().unwrap();
        assert_eq!(second.seq().value(), 1);
        assert_eq!(second.payload(), b"queued-b");
    }

    #[test]
    fn test_clear_resets_sequence_space() {
        let now = Instant::now();
        let mut w = window(2);
        w.push(b"a", 2);
        w.next_unsent().unwrap().mark_sent(now);
        w.clear();

        assert!(w.is_empty());
        assert_eq!(w.vs(), SequenceNumber::ZERO);
        assert_eq!(w.last_acked(), SequenceNumber::ZERO);
        assert_eq!(w.push(b"b", 2).value(), 0);
    }
}
