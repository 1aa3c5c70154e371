//! Per-thread, per-renderer command-object rows.
//!
//! `GetCommandObject` resolves through a two-level map: the renderer keeps
//! `thread-id → row` under a mutex, and each row holds one slot per frame
//! in the ring, touched only by its owning thread. A thread-exit guard
//! removes the thread's rows from every live renderer; renderer teardown
//! drops its whole map before the device dies.

use std::any::Any;
use std::cell::RefCell;
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Process-wide table of live renderer maps, keyed by renderer id, so
/// exiting threads can scrub their rows.
static LIVE_MAPS: Lazy<Mutex<FxHashMap<u64, Weak<RowTable>>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

type RowTable = Mutex<FxHashMap<ThreadId, Arc<dyn Any + Send + Sync>>>;

/// One thread's per-frame slots for one renderer.
///
/// Slots are only ever touched from the owning thread; the renderer's map
/// merely keeps the row alive and countable.
pub(crate) struct ThreadRow<T> {
    slots: Box<[RefCell<Option<T>>]>,
}

// SAFETY: slot access is confined to the owning thread by contract; other
// threads only move the Arc (renderer teardown after workers quiesce).
unsafe impl<T: Send> Send for ThreadRow<T> {}
unsafe impl<T: Send> Sync for ThreadRow<T> {}

impl<T> ThreadRow<T> {
    fn new(frame_count: usize) -> Self {
        Self {
            slots: (0..frame_count).map(|_| RefCell::new(None)).collect(),
        }
    }

    /// Run `f` on the slot for `frame`, creating its value on first use.
    ///
    /// Must only be called from the thread the row belongs to.
    pub(crate) fn try_with_slot<R, E>(
        &self,
        frame: usize,
        init: impl FnOnce() -> Result<T, E>,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, E> {
        let mut slot = self.slots[frame].borrow_mut();
        if slot.is_none() {
            *slot = Some(init()?);
        }
        Ok(f(slot.as_mut().expect("slot initialized above")))
    }

    /// Raw pointer to the slot's value for C-ABI hand-out; initializes on
    /// first use. Stable until the row drops.
    pub(crate) fn try_slot_ptr<E>(
        &self,
        frame: usize,
        init: impl FnOnce() -> Result<T, E>,
    ) -> Result<*mut T, E> {
        let mut slot = self.slots[frame].borrow_mut();
        if slot.is_none() {
            *slot = Some(init()?);
        }
        Ok(slot.as_mut().expect("slot initialized above") as *mut T)
    }
}

/// The renderer-owned side of the map.
pub(crate) struct ThreadMap {
    id: u64,
    rows: Arc<RowTable>,
}

thread_local! {
    static EXIT_GUARD: RefCell<Option<ExitGuard>> = const { RefCell::new(None) };
}

struct ExitGuard;

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let thread = std::thread::current().id();
        let maps = LIVE_MAPS.lock();
        for table in maps.values() {
            if let Some(table) = table.upgrade() {
                table.lock().remove(&thread);
            }
        }
    }
}

fn ensure_exit_guard() {
    EXIT_GUARD.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            *slot = Some(ExitGuard);
        }
    });
}

impl ThreadMap {
    pub(crate) fn new(id: u64) -> Self {
        let rows: Arc<RowTable> = Arc::new(Mutex::new(FxHashMap::default()));
        LIVE_MAPS.lock().insert(id, Arc::downgrade(&rows));
        Self { id, rows }
    }

    /// The calling thread's row, created on first use.
    pub(crate) fn row<T: Send + 'static>(&self, frame_count: usize) -> Arc<ThreadRow<T>> {
        ensure_exit_guard();
        let thread = std::thread::current().id();
        let mut rows = self.rows.lock();
        if let Some(row) = rows.get(&thread) {
            let row = Arc::clone(row);
            drop(rows);
            // The slot type is fixed per map; a mismatch is a programming
            // error inside this crate.
            return match row.downcast::<ThreadRow<T>>() {
                Ok(row) => row,
                Err(_) => unreachable!("thread row slot type mismatch"),
            };
        }
        let row = Arc::new(ThreadRow::<T>::new(frame_count));
        rows.insert(thread, Arc::clone(&row) as Arc<dyn Any + Send + Sync>);
        row
    }

    /// Number of threads with live rows; scenario checks read this.
    pub(crate) fn thread_count(&self) -> usize {
        self.rows.lock().len()
    }

    /// Drop every row; runs before the device dies.
    pub(crate) fn clear(&self) {
        self.rows.lock().clear();
    }
}

impl Drop for ThreadMap {
    fn drop(&mut self) {
        self.clear();
        LIVE_MAPS.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_created_per_thread_and_scrubbed_on_exit() {
        let map = Arc::new(ThreadMap::new(9001));
        assert_eq!(map.thread_count(), 0);

        let row = map.row::<u32>(3);
        row.try_with_slot::<_, ()>(0, || Ok(7), |value| *value += 1)
            .unwrap();
        row.try_with_slot::<_, ()>(0, || unreachable!(), |value| assert_eq!(*value, 8))
            .unwrap();
        assert_eq!(map.thread_count(), 1);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let map = Arc::clone(&map);
            handles.push(std::thread::spawn(move || {
                for frame in 0..3 {
                    let row = map.row::<u32>(3);
                    for _ in 0..100 {
                        row.try_with_slot::<_, ()>(frame, || Ok(0), |value| *value += 1)
                            .unwrap();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Worker rows disappeared with their threads; ours remains.
        assert_eq!(map.thread_count(), 1);
    }

    #[test]
    fn renderer_teardown_clears_rows() {
        let map = ThreadMap::new(9002);
        let _row = map.row::<String>(2);
        assert_eq!(map.thread_count(), 1);
        map.clear();
        assert_eq!(map.thread_count(), 0);
    }

    #[test]
    fn slot_pointers_are_stable() {
        let map = ThreadMap::new(9003);
        let row = map.row::<u64>(2);
        let first = row.try_slot_ptr::<()>(1, || Ok(41)).unwrap();
        let second = row.try_slot_ptr::<()>(1, || unreachable!()).unwrap();
        assert_eq!(first, second);
        unsafe { *second += 1 };
        row.try_with_slot::<_, ()>(1, || unreachable!(), |value| assert_eq!(*value, 42))
            .unwrap();
    }
}
