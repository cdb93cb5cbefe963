//! The per-vendor dispatch table.
//!
//! A table is the thing a thread makes current: a dense array of entrypoint
//! addresses, one per registered slot, plus the bookkeeping a controller
//! needs to decide whether the table is still live and whether it needs a
//! fixup pass before the next slot lookup can rely on it.

use crate::proc_address::{noop_proc, RawProc};
use std::sync::atomic::{AtomicU32, Ordering};

/// Opaque handle to a table owned by a controller. Callers never see the
/// table itself, only this id, so the controller is free to move tables
/// around internally without invalidating anything a caller holds onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u64);

/// A vendor's `GetProcAddress`-equivalent: given an entrypoint name, returns
/// the vendor's function pointer for it, or `None` if the vendor doesn't
/// implement it. Stored per-table so fixup can resolve newly registered
/// slots without the vendor needing to push updates itself.
pub type GetProcFn = Box<dyn Fn(&str) -> Option<RawProc> + Send + Sync>;

/// A single vendor's view of the shared slot space.
///
/// `slots` starts out unallocated: a table created but never bound to a
/// thread never materializes its array, matching `get_proc` only ever being
/// invoked once something actually dispatches through this vendor. The
/// first `fixup` call allocates it, covering every slot the registry knows
/// about at that point; later calls only extend it against newly
/// registered dynamic slots.
pub struct DispatchTable {
    pub id: TableId,
    pub vendor_id: i32,
    slots: Option<Vec<RawProc>>,
    generation: u64,
    refcount: AtomicU32,
    get_proc: GetProcFn,
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable")
            .field("id", &self.id)
            .field("vendor_id", &self.vendor_id)
            .field("slot_count", &self.slot_count())
            .field("generation", &self.generation)
            .field("refcount", &self.refcount.load(Ordering::Relaxed))
            .finish()
    }
}

impl DispatchTable {
    /// Creates a table with no allocated `slots` array. `get_proc` is not
    /// called until the first [`fixup`](Self::fixup), which happens when
    /// this table is first bound to a thread.
    pub fn new(id: TableId, vendor_id: i32, get_proc: GetProcFn) -> Self {
        Self {
            id,
            vendor_id,
            slots: None,
            generation: 0,
            refcount: AtomicU32::new(0),
            get_proc,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    pub fn incref(&self) -> u32 {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the refcount and returns the value after decrementing.
    /// A table reaching zero is not dropped automatically — the owning
    /// controller decides whether a zero-refcount table stays around for
    /// reuse or is torn down.
    pub fn decref(&self) -> u32 {
        self.refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(v.saturating_sub(1)))
            .map(|v| v.saturating_sub(1))
            .unwrap_or(0)
    }

    /// Whether the `slots` array has been allocated yet (i.e. this table
    /// has been bound to at least one thread).
    pub fn is_allocated(&self) -> bool {
        self.slots.is_some()
    }

    /// Reads the address currently installed in `slot`. Out-of-range reads
    /// — including every read against a table never yet allocated — return
    /// the no-op rather than panicking, since a racing reader may observe a
    /// table that hasn't been extended to a slot registered on another
    /// thread a moment ago.
    pub fn read_slot(&self, slot: u32) -> RawProc {
        self.slots
            .as_ref()
            .and_then(|s| s.get(slot as usize).copied())
            .unwrap_or(noop_proc as RawProc)
    }

    pub fn slot_count(&self) -> u32 {
        self.slots.as_ref().map(|s| s.len() as u32).unwrap_or(0)
    }

    /// Extends `slots` (allocating it on the first call) to cover every
    /// entry in `new_entries` (assumed to be in ascending slot order with
    /// no gaps relative to the current length) and advances `generation` to
    /// `new_generation`.
    pub fn fixup(&mut self, new_entries: &[(u32, &str)], new_generation: u64) {
        let slots = self.slots.get_or_insert_with(Vec::new);
        for &(slot, name) in new_entries {
            let resolved = (self.get_proc)(name).unwrap_or(noop_proc as RawProc);
            if slot as usize == slots.len() {
                slots.push(resolved);
            } else if (slot as usize) < slots.len() {
                slots[slot as usize] = resolved;
            } else {
                slots.resize(slot as usize, noop_proc as RawProc);
                slots.push(resolved);
            }
        }
        self.generation = new_generation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_vendor_fn() -> RawProc {
        unsafe extern "C" fn f() {}
        f as RawProc
    }

    #[test]
    fn new_table_has_no_allocated_slots() {
        let get_proc: GetProcFn = Box::new(|_name| None);
        let table = DispatchTable::new(TableId(1), 7, get_proc);
        assert!(!table.is_allocated());
        assert_eq!(table.slot_count(), 0);
        assert_eq!(table.read_slot(0) as usize, noop_proc as usize);
    }

    #[test]
    fn fixup_allocates_on_first_call_and_resolves_named_slots() {
        let get_proc: GetProcFn = Box::new(|name| if name == "glFoo" { Some(dummy_vendor_fn()) } else { None });
        let mut table = DispatchTable::new(TableId(1), 7, get_proc);
        table.fixup(&[(0, "glFoo"), (1, "glBar")], 2);
        assert!(table.is_allocated());
        assert_eq!(table.slot_count(), 2);
        assert_eq!(table.read_slot(0) as usize, dummy_vendor_fn() as usize);
        assert_eq!(table.read_slot(1) as usize, noop_proc as usize);
        assert_eq!(table.generation(), 2);
    }

    #[test]
    fn out_of_range_read_returns_noop() {
        let get_proc: GetProcFn = Box::new(|_name| None);
        let table = DispatchTable::new(TableId(1), 7, get_proc);
        assert_eq!(table.read_slot(99) as usize, noop_proc as usize);
    }

    #[test]
    fn refcount_tracks_increments_and_decrements() {
        let get_proc: GetProcFn = Box::new(|_name| None);
        let table = DispatchTable::new(TableId(1), 7, get_proc);
        assert_eq!(table.incref(), 1);
        assert_eq!(table.incref(), 2);
        assert_eq!(table.decref(), 1);
        assert_eq!(table.decref(), 0);
        assert_eq!(table.decref(), 0);
    }
}
