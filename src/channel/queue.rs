//! Three-state outbound queue.
//!
//! `Paused` queues everything. `Flushing` drains the queue in order; items
//! pushed while flushing join the tail of the same drain. `Open` hands
//! items straight back to the caller for delivery.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Paused,
    Flushing,
    Open,
}

#[derive(Debug)]
pub struct SendQueue<T> {
    state: QueueState,
    queued: VecDeque<T>,
    flushes: u64,
}

impl<T> SendQueue<T> {
    /// A queue starts paused.
    pub fn new() -> Self {
        Self {
            state: QueueState::Paused,
            queued: VecDeque::new(),
            flushes: 0,
        }
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Number of completed flushes.
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    /// Queue `item`, or return it when the queue is open and it should be
    /// delivered now.
    pub fn push(&mut self, item: T) -> Option<T> {
        match self.state {
            QueueState::Open => Some(item),
            QueueState::Paused | QueueState::Flushing => {
                self.queued.push_back(item);
                None
            }
        }
    }

    /// Stop delivering; subsequent pushes queue.
    pub fn pause(&mut self) {
        debug_assert!(self.state != QueueState::Flushing, "pause during flush");
        self.state = QueueState::Paused;
    }

    /// Enter `Flushing`. Drain with [`next_flushed`](Self::next_flushed), then
    /// call [`finish_flush`](Self::finish_flush).
    pub fn begin_flush(&mut self) {
        self.state = QueueState::Flushing;
    }

    pub fn next_flushed(&mut self) -> Option<T> {
        debug_assert_eq!(self.state, QueueState::Flushing);
        self.queued.pop_front()
    }

    pub fn finish_flush(&mut self) {
        debug_assert!(self.queued.is_empty(), "flush finished with items queued");
        self.state = QueueState::Open;
        self.flushes += 1;
    }

    /// Flush everything through `deliver` in order and open the queue.
    pub fn open_with(&mut self, mut deliver: impl FnMut(T)) -> usize {
        self.begin_flush();
        let mut delivered = 0;
        while let Some(item) = self.next_flushed() {
            deliver(item);
            delivered += 1;
        }
        self.finish_flush();
        delivered
    }

    /// Drop everything queued.
    pub fn clear(&mut self) -> usize {
        let dropped = self.queued.len();
        self.queued.clear();
        dropped
    }
}

impl<T> Default for SendQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paused_queue_holds_items() {
        let mut queue = SendQueue::new();
        assert_eq!(queue.state(), QueueState::Paused);
        assert_eq!(queue.push(1), None);
        assert_eq!(queue.push(2), None);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_open_flushes_in_order_once() {
        let mut queue = SendQueue::new();
        for i in 0..4 {
            queue.push(i);
        }

        let mut delivered = Vec::new();
        assert_eq!(queue.open_with(|i| delivered.push(i)), 4);
        assert_eq!(delivered, vec![0, 1, 2, 3]);
        assert_eq!(queue.state(), QueueState::Open);
        assert_eq!(queue.flush_count(), 1);
        assert!(queue.is_empty());

        assert_eq!(queue.push(9), Some(9));
    }

    #[test]
    fn test_push_during_flush_joins_tail() {
        let mut queue = SendQueue::new();
        queue.push("a");
        queue.begin_flush();
        assert_eq!(queue.state(), QueueState::Flushing);

        assert_eq!(queue.next_flushed(), Some("a"));
        assert_eq!(queue.push("b"), None);
        assert_eq!(queue.next_flushed(), Some("b"));
        assert_eq!(queue.next_flushed(), None);
        queue.finish_flush();
        assert_eq!(queue.state(), QueueState::Open);
    }

    #[test]
    fn test_pause_after_open_queues_again() {
        let mut queue = SendQueue::new();
        queue.open_with(|_: u8| {});
        queue.pause();
        assert_eq!(queue.push(1), None);
        assert_eq!(queue.clear(), 1);
    }
}
