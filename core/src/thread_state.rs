//! Per-thread current-dispatch state.
//!
//! Every thread that has made a table current owns one `ThreadState`,
//! reached through a thread-local in `dispatch-runtime`. The state itself
//! is `Arc`-shared so the controller can also hold a weak reference for
//! cross-thread bookkeeping (fork reset, thread-exit teardown) without
//! pinning the thread-local's lifetime to the controller.

use crate::table::TableId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Opaque identity for a thread's dispatch state, stable for the life of
/// the thread. Distinct from the OS thread id, which platforms are free to
/// recycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadTag(pub u64);

impl ThreadTag {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ThreadTag(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Default)]
struct Current {
    vendor_id: Option<i32>,
    table: Option<TableId>,
}

/// The mutable part of a thread's dispatch state, guarded by its own lock
/// so the owning thread's fast path and the controller's cross-thread
/// teardown path never need to agree on a wider lock.
#[derive(Debug)]
pub struct ThreadState {
    pub tag: ThreadTag,
    current: Mutex<Current>,
}

impl ThreadState {
    pub fn new() -> Self {
        Self {
            tag: ThreadTag::next(),
            current: Mutex::new(Current::default()),
        }
    }

    /// Records `table` (owned by `vendor_id`) as this thread's current
    /// dispatch state.
    pub fn set_current(&self, vendor_id: i32, table: TableId) {
        let mut guard = self.current.lock().unwrap();
        guard.vendor_id = Some(vendor_id);
        guard.table = Some(table);
    }

    /// Clears this thread's current dispatch state, returning whatever was
    /// current before (if anything), so the caller can release the
    /// corresponding table reference.
    pub fn clear_current(&self) -> Option<(i32, TableId)> {
        let mut guard = self.current.lock().unwrap();
        let prev = guard.vendor_id.zip(guard.table);
        guard.vendor_id = None;
        guard.table = None;
        prev
    }

    pub fn current_table(&self) -> Option<TableId> {
        self.current.lock().unwrap().table
    }

    pub fn current_vendor(&self) -> Option<i32> {
        self.current.lock().unwrap().vendor_id
    }

    pub fn is_current(&self) -> bool {
        self.current.lock().unwrap().table.is_some()
    }
}

impl Default for ThreadState {
    fn default() -> Self {
        Self::new()
    }
}
