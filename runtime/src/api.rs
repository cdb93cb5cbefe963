//! The public operation surface.
//!
//! Thin wrappers over [`crate::controller::global`] and [`crate::tls`] —
//! everything here is what an application or a vendor library actually
//! calls; `Controller` itself stays an implementation detail that tests
//! are free to instantiate directly instead of going through the
//! process-wide singleton.

use crate::controller;
use crate::tls;
use dispatch_core::patch::PatchCallbacks;
use dispatch_core::table::{GetProcFn, TableId};
use dispatch_core::{DispatchError, RawProc, StubProvider, StubProviderId, ThreadState};
use std::sync::Arc;

/// Attaches a client to the dispatch core, incrementing the process-wide
/// refcount. Call once per client before any other operation here.
pub fn init() {
    controller::global().init();
}

/// Detaches a client. On the last detach, unregisters every stub provider
/// and frees all tables, slots, and thread bookkeeping.
pub fn finalize() {
    controller::global().finalize();
}

/// Allocates a fresh vendor id. Vendors call this once, at load time.
pub fn new_vendor_id() -> i32 {
    controller::global().new_vendor_id()
}

/// Registers a new dispatch table for `vendor_id`, resolved through
/// `get_proc`.
pub fn create_table(vendor_id: i32, get_proc: GetProcFn) -> TableId {
    controller::global().create_table(vendor_id, get_proc)
}

/// Marks `table` for destruction once it's no longer current anywhere.
pub fn destroy_table(table: TableId) {
    controller::global().destroy_table(table)
}

/// Tears down every table belonging to `vendor_id`. Called when a vendor
/// library unloads.
pub fn destroy_vendor_tables(vendor_id: i32) {
    controller::global().destroy_vendor_tables(vendor_id)
}

/// Resolves `name` to a stable slot, registering it as a new dynamic
/// entrypoint if this is the first time it's been requested, and returns
/// the stub address callers should cache and call through.
pub fn get_proc_address(name: &str) -> Result<RawProc, DispatchError> {
    controller::global().get_proc_address(name)
}

/// Makes `table` (owned by `vendor_id`) current for the calling thread.
/// Optionally attempts to patch entrypoints for `vendor_id` first, via
/// `patch_callbacks`; patching failure does not block make-current unless
/// another vendor currently holds patch ownership and refuses to be
/// dislodged (which the patch state machine only does by failing to patch
/// any provider at all).
pub fn make_current(
    vendor_id: i32,
    table: TableId,
    patch_callbacks: Option<Arc<dyn PatchCallbacks>>,
) -> Result<(), DispatchError> {
    controller::global()
        .make_current(vendor_id, table, patch_callbacks)
        .map(|_state| ())
}

/// Rebinds the calling thread's current vendor to a different table of
/// its own. Fails if the thread has no current dispatch state.
pub fn set_dispatch(table: TableId) -> Result<(), DispatchError> {
    let state = tls::current().ok_or(DispatchError::NoCurrentThreadState)?;
    let vendor_id = state.current_vendor().ok_or(DispatchError::NoCurrentThreadState)?;
    controller::global().set_dispatch(&state, Some((vendor_id, table)))
}

/// Releases the calling thread's current dispatch state, if any.
pub fn lose_current() {
    if let Some(state) = tls::current() {
        controller::global().lose_current(&state);
    }
}

/// Returns the calling thread's dispatch state, if it has made a table
/// current.
pub fn get_current_thread_state() -> Option<Arc<ThreadState>> {
    tls::current()
}

/// True once a second distinct thread has ever called [`make_current`].
/// Sticky: once set, stays set for the life of the process.
pub fn is_multithreaded() -> bool {
    controller::global().is_multithreaded()
}

/// Registers `provider` as an additional stub family. Providers are
/// pluggable: more than one may be registered at a time.
pub fn register_stub_provider(provider: Arc<dyn StubProvider>) -> StubProviderId {
    controller::global().register_stub_provider(provider)
}

/// Removes a previously registered stub provider.
pub fn unregister_stub_provider(id: StubProviderId) {
    controller::global().unregister_stub_provider(id)
}

/// Resets all dispatch state after a `fork()` in the child process. Must
/// be called from a `pthread_atfork`-style child hook before any dispatch
/// call is made in the child.
pub fn reset() {
    controller::global().reset()
}

/// Reads the entrypoint currently installed in `slot` for the calling
/// thread's current table, falling back to the no-op if nothing is
/// current. This is the hot path a synthesized stub would take if it
/// called back into Rust instead of reading its own TLS directly.
pub fn dispatch(slot: u32) -> RawProc {
    match tls::current() {
        Some(state) => controller::global().dispatch(&state, slot),
        None => dispatch_core::proc_address::noop_proc as RawProc,
    }
}
