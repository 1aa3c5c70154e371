//! The submission-window protocol.
//!
//! The renderer owns one [`SubmitShared`] block per swap chain; command
//! objects hold a `Weak` to it and publish finished lists through
//! [`SubmitShared::publish`]. Publication parks on the condvar while the
//! window is closed and appends to the current frame's FIFO once it opens,
//! so the set of lists drained by `EndFrame` is exactly the set published
//! inside the window.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct WindowState<T> {
    open: bool,
    current_frame: usize,
    ready: Vec<VecDeque<T>>,
}

/// Shared submission state; generic over the list type so the protocol is
/// testable without a GPU.
pub(crate) struct SubmitShared<T> {
    state: Mutex<WindowState<T>>,
    cond: Condvar,
}

impl<T> SubmitShared<T> {
    pub(crate) fn new(frame_count: usize) -> Self {
        Self {
            state: Mutex::new(WindowState {
                open: false,
                current_frame: 0,
                ready: (0..frame_count).map(|_| VecDeque::new()).collect(),
            }),
            cond: Condvar::new(),
        }
    }

    /// Open the window for `frame`; parked publishers resume and land in
    /// this frame's FIFO.
    pub(crate) fn open(&self, frame: usize) {
        let mut state = self.state.lock();
        state.current_frame = frame;
        state.open = true;
        self.cond.notify_all();
    }

    /// Close the window and drain the current frame's FIFO in publication
    /// order.
    pub(crate) fn close(&self) -> Vec<T> {
        let mut state = self.state.lock();
        state.open = false;
        let frame = state.current_frame;
        state.ready[frame].drain(..).collect()
    }

    /// Publish one finished list; parks until the window is open.
    pub(crate) fn publish(&self, item: T) {
        let mut state = self.state.lock();
        while !state.open {
            self.cond.wait(&mut state);
        }
        let frame = state.current_frame;
        state.ready[frame].push_back(item);
    }

    /// Lists currently queued for `frame`; used by the renderer's
    /// destruction checks.
    pub(crate) fn pending_for(&self, frame: usize) -> usize {
        self.state.lock().ready[frame].len()
    }

    /// Whether the window is open.
    pub(crate) fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn drained_equals_published_inside_window() {
        let shared = SubmitShared::new(3);
        shared.open(1);
        shared.publish(10u32);
        shared.publish(11);
        shared.publish(12);
        let drained = shared.close();
        assert_eq!(drained, vec![10, 11, 12]);
        assert_eq!(shared.pending_for(1), 0);
        assert!(!shared.is_open());
    }

    #[test]
    fn frames_keep_independent_queues() {
        let shared = SubmitShared::new(2);
        shared.open(0);
        shared.publish(1u32);
        assert_eq!(shared.close(), vec![1]);

        shared.open(1);
        shared.publish(2);
        assert_eq!(shared.pending_for(0), 0);
        assert_eq!(shared.close(), vec![2]);
    }

    #[test]
    fn publication_outside_the_window_parks_until_the_next_open() {
        let shared = Arc::new(SubmitShared::new(3));
        let publisher = Arc::clone(&shared);
        let handle = std::thread::spawn(move || publisher.publish(7u32));

        // The publisher must not land anywhere while the window is closed.
        std::thread::sleep(Duration::from_millis(50));
        for frame in 0..3 {
            assert_eq!(shared.pending_for(frame), 0);
        }

        shared.open(2);
        handle.join().unwrap();
        assert_eq!(shared.close(), vec![7]);
    }

    #[test]
    fn worker_publications_arrive_in_push_order() {
        let shared = Arc::new(SubmitShared::new(1));
        shared.open(0);

        let mut handles = Vec::new();
        for worker in 0..8u32 {
            let publisher = Arc::clone(&shared);
            handles.push(std::thread::spawn(move || publisher.publish(worker)));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let mut drained = shared.close();
        assert_eq!(drained.len(), 8);
        // Cross-worker order is unspecified; the FIFO only promises that
        // every publication is present exactly once.
        drained.sort_unstable();
        assert_eq!(drained, (0..8).collect::<Vec<_>>());
    }
}
